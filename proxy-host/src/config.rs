// Copyright (C) 2021  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Host tuning knobs; all fields have defaults so embedders can load a
//! partial configuration from TOML/JSON.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostOptions {
    /// Depth of the outbound frame queue feeding the transport writer
    pub send_queue_depth: usize,
    /// Initial delay before a CancellationRequest is resent
    pub cancel_retry_start_ms: u64,
    /// Upper bound on the cancellation resend delay
    pub cancel_retry_cap_ms: u64,
    /// How long `dispose()` waits for background tasks to finish
    pub dispose_join_timeout_ms: u64,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            send_queue_depth: 128,
            cancel_retry_start_ms: 200,
            cancel_retry_cap_ms: 1_000,
            dispose_join_timeout_ms: 5_000,
        }
    }
}

impl HostOptions {
    pub(crate) fn cancel_retry_start(&self) -> Duration {
        Duration::from_millis(self.cancel_retry_start_ms)
    }

    pub(crate) fn cancel_retry_cap(&self) -> Duration {
        Duration::from_millis(self.cancel_retry_cap_ms)
    }

    pub(crate) fn dispose_join_timeout(&self) -> Duration {
        Duration::from_millis(self.dispose_join_timeout_ms)
    }
}

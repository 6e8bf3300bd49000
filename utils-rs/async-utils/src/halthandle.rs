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

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::FutureExt;

/// Internal, used to signal termination via `trigger`
/// and notify `Tasks` when that happens.
#[derive(Debug)]
struct Halt {
    trigger: Trigger,
    notify_join: Arc<Notify>,
}

/// Internal, used in the `Tasks` channel,
/// contains either a join handle of a task
/// that was spawned or a ready notification which
/// indicates to the `join()` function that all necessary tasks
/// were spawned.
#[derive(Debug)]
enum TaskMsg {
    Task(JoinHandle<()>),
    Ready,
}

/// Internal, used in `HaltHandle::join()`
/// to wait on signal from `halt()`
/// and then collect halting tasks' join handles.
#[derive(Debug)]
struct Tasks {
    tasks_rx: mpsc::UnboundedReceiver<TaskMsg>,
    notify_join: Arc<Notify>,
}

/// Error type returned by `HaltHandle::join()`.
#[derive(Debug)]
pub enum HaltError {
    /// Tasks didn't finish inside the timeout passed to `join()`.
    Timeout,
    /// One of the tasks panicked.
    Join(JoinError),
}

impl fmt::Display for HaltError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltError::Timeout => write!(fmt, "Timeout"),
            HaltError::Join(err) => write!(fmt, "Join error: {}", err),
        }
    }
}

impl StdError for HaltError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            HaltError::Timeout => None,
            HaltError::Join(err) => err.source(),
        }
    }
}

/// A synchronization end that can be used to
/// cancel tasks which use the associated `Tripwire` instance.
#[derive(Debug)]
pub struct Trigger(CancellationToken);

impl Trigger {
    pub fn cancel(self) {
        self.0.cancel();
    }
}

/// A synchronization end that tasks can use to wait on,
/// using eg. `take_until()` or `select!()` or similar,
/// to await cancellation.
///
/// The tripwire is a `Future` resolving to `()` once the associated
/// `Trigger` fires; clones observe the same trigger. The wait future is
/// boxed so the tripwire stays `Unpin` for use in stream combinators.
pub struct Tripwire {
    token: CancellationToken,
    wait: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl Tripwire {
    pub fn new() -> (Trigger, Self) {
        let token = CancellationToken::new();
        (Trigger(token.clone()), Self::with_token(token))
    }

    fn with_token(token: CancellationToken) -> Self {
        Self {
            wait: Box::pin(token.clone().cancelled_owned()),
            token,
        }
    }

    /// `true` once the associated `Trigger` has fired
    pub fn is_tripped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Clone for Tripwire {
    fn clone(&self) -> Self {
        Self::with_token(self.token.clone())
    }
}

impl fmt::Debug for Tripwire {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Tripwire")
            .field("token", &self.token)
            .finish()
    }
}

impl Future for Tripwire {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<()> {
        self.wait.as_mut().poll(ctx)
    }
}

/// A handle with which tasks can be spawned and then halted.
///
/// # Usage
/// 1. Create a `HaltHandle` with `HaltHandle::new()` or `HaltHandle::arc()`
///    (use the latter if you want to share it between tasks).
/// 2. Spawn any number of tasks using the `spawn()` method.
/// 3. When all relevant `spawn()` calls were made, use the `ready()` method
///    to tell the `HaltHandle` that all tasks were spawned.
/// 4. Use `halt()` to tell the spawned tasks that they should stop.
/// 5. Use `join()` to wait on the tasks to stop (a timeout may be used).
///
/// Note that `halt()` doesn't necessarily need to be called
/// after `ready()`. These can be called pretty much anytime and it won't cause
/// a race condition as long as `ready()` is called in the right moment.
#[derive(Debug)]
pub struct HaltHandle {
    /// Tripwire that is cloned into
    /// 'child' tasks when they are started with this handle.
    tripwire: Tripwire,
    /// Used to trigger the tripwire and then notifies `tasks`.
    halt: Mutex<Option<Halt>>,
    /// Spawned task handles as well as a ready notification are sent here, see `TaskMsg`
    tasks_tx: mpsc::UnboundedSender<TaskMsg>,
    /// Used to receive notification from `halt` and the task handles.
    tasks: Mutex<Option<Tasks>>,
}

impl HaltHandle {
    /// Create a new `HaltHandle`
    pub fn new() -> Self {
        let (trigger, tripwire) = Tripwire::new();
        let notify_join = Arc::new(Notify::new());
        let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();

        Self {
            tripwire,
            halt: Mutex::new(Some(Halt {
                trigger,
                notify_join: notify_join.clone(),
            })),
            tasks_tx,
            tasks: Mutex::new(Some(Tasks {
                tasks_rx,
                notify_join,
            })),
        }
    }

    /// Create a `HaltHandle` and wrap it in `Arc` for sharing between tasks
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Spawn a new task. `f` is a function that takes
    /// a `Tripwire` and returns a `Future` to be spawned.
    /// `Tripwire` can be passed to `StreamExt::take_until`
    /// to make a stream stop generating items when
    /// `halt()` is called on the `HaltHandle`.
    pub fn spawn<FT, FN>(&self, f: FN)
    where
        FT: Future<Output = ()> + Send + 'static,
        FN: FnOnce(Tripwire) -> FT,
    {
        let ft = f(self.tripwire());
        self.add_task(tokio::spawn(ft));
    }

    pub fn tripwire(&self) -> Tripwire {
        self.tripwire.clone()
    }

    pub fn add_task(&self, task: JoinHandle<()>) {
        // Errors are ignored here - send() on an unbounded channel
        // only fails if the receiver is dropped, and in that case
        // we don't care that the send() failed
        let _ = self.tasks_tx.send(TaskMsg::Task(task));
    }

    /// Tells the handle that all tasks were spawned
    pub fn ready(&self) {
        // Send a Ready message. join() uses this to tell
        // that enough join handles were collected.
        // Error is ignored here for the same reason as in spawn().
        let _ = self.tasks_tx.send(TaskMsg::Ready);
    }

    /// Tell the handle to halt all the associated tasks.
    pub fn halt(&self) {
        if let Some(halt) = self
            .halt
            .lock()
            .expect("BUG: HaltHandle: Poisoned mutex")
            .take()
        {
            halt.trigger.cancel();
            halt.notify_join.notify_one();
        }
    }

    /// Wait for all associated tasks to finish once `ready()` and `halt()` are called.
    ///
    /// An optional `timeout` may be provided, this is the maximum time
    /// to wait **after** `halt()` has been called.
    ///
    /// Returns `Ok(())` when tasks are collected succesfully, or a `HaltError::Timeout`
    /// if tasks didn't stop in time, or a `HaltError::Join` when a task panics.
    /// If multiple tasks panic, the first join error encountered is returned.
    ///
    /// # Panics
    /// `join()` panics if you call it multiple times. It must only be called once.
    pub async fn join(&self, timeout: Option<Duration>) -> Result<(), HaltError> {
        let mut tasks = self
            .tasks
            .lock()
            .expect("BUG: HaltHandle: Poisoned mutex")
            .take()
            .expect("BUG: HaltHandle: join() called multiple times");

        tasks.notify_join.notified().await;

        // Collect join handles. Join handles are added to the
        // tasks channel by spawn(). After the user decides all
        // relevant tasks were added, they call ready().
        // ready() pushes a ready message, TaskMsg::Ready, to this channel.
        // Here we collect all the task join handles until we reach the ready message.
        let mut handles = vec![];
        while let Some(task_msg) = tasks.tasks_rx.recv().await {
            match task_msg {
                TaskMsg::Task(handle) => handles.push(handle),
                TaskMsg::Ready => break,
            }
        }

        // Join all the spawned tasks, wait for them to finalize
        let ft = futures::future::join_all(handles.drain(..));
        // If there's a timeout, only wait so much
        let mut res = if let Some(timeout) = timeout {
            match ft.timeout(timeout).await {
                Ok(res) => res,
                Err(_) => return Err(HaltError::Timeout),
            }
        } else {
            ft.await
        };

        // Map errors, return the first one encountered (if any)
        res.drain(..)
            .fold(Ok(()), Result::and)
            .map_err(HaltError::Join)
    }
}

impl Default for HaltHandle {
    fn default() -> Self {
        Self::new()
    }
}

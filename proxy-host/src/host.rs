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

//! The `ProxyHost` façade: one endpoint of a proxy connection.
//!
//! A host owns the split framed connection (a send task is the single
//! holder of the transport sink, fed by an mpsc queue; a receive loop
//! drains the other half), the proxy registry, the call correlator and the
//! cancellation bridge. Inbound method calls and activations are handled on
//! spawned tasks so slow services do not stall the stream; returns,
//! deactivations and cancellation requests are handled inline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use futures::prelude::*;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rp_async_utils::{HaltHandle, Tripwire};
use rp_logging::macros::*;
use rp_remoting::messages::{
    Activation, ActivationMode, CancellationRequest, Deactivation, ExceptionKind, MethodCall,
    ReturnException, ReturnValue, WireException,
};
use rp_remoting::{DynFrameSink, DynFrameStream, Frame, Message, MethodDesc, Value};
use rp_wire::Connection;

use crate::cancel::{CallScope, CancellationBridge};
use crate::config::HostOptions;
use crate::correlator::{CallCorrelator, CallReply};
use crate::error::{Error, Result};
use crate::proxy::{Proxy, ProxyHandle, ProxyShared, RemoteType};
use crate::registry::ProxyRegistry;
use crate::serializer::{
    encode_call_args, local_proxy_ref, resolve_args, resolve_reply, CallArg,
};
use crate::service::{Arg, ProxyParam, ServiceDescriptor, ServiceLocator};

/// One endpoint of a proxy connection.
///
/// Cloning is shallow; all clones drive the same host. The host must be
/// torn down with [`ProxyHost::dispose`]; dropping it silently stops
/// nothing by itself (the background tasks hold only weak references and
/// wind down once the last handle is gone).
#[derive(Clone)]
pub struct ProxyHost {
    core: Arc<HostCore>,
}

impl ProxyHost {
    /// Creates a host over an established full-duplex bytestream and
    /// starts its background tasks
    pub fn new<S>(stream: S, locator: Arc<dyn ServiceLocator>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_options(stream, locator, HostOptions::default())
    }

    pub fn with_options<S>(
        stream: S,
        locator: Arc<dyn ServiceLocator>,
        options: HostOptions,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let connection = Connection::<rp_remoting::Framing, S>::new(stream);
        let (sink, frames) = connection.split();
        let sink: DynFrameSink = Box::pin(sink);
        let frames: DynFrameStream = Box::pin(frames);

        let (frame_tx, frame_rx) = mpsc::channel(options.send_queue_depth);

        let core = Arc::new_cyclic(|weak: &Weak<HostCore>| HostCore {
            options,
            registry: ProxyRegistry::new(),
            correlator: CallCorrelator::new(),
            cancel: CancellationBridge::new(),
            locator,
            frame_tx: StdMutex::new(Some(frame_tx)),
            halt: HaltHandle::arc(),
            disposed: AtomicBool::new(false),
            weak: weak.clone(),
        });

        core.spawn_tasks(sink, frames, frame_rx);

        Self { core }
    }

    /// Activation mode Create: the peer constructs a fresh instance of `T`
    /// via its service locator
    pub async fn create<T: RemoteType>(&self, args: Vec<CallArg>) -> Result<Proxy<T>> {
        let handle = self
            .core
            .activate(T::TYPE_NAME, ActivationMode::Create, args)
            .await?;
        Ok(Proxy::from_handle(handle))
    }

    /// Activation mode Load: the peer looks up a preregistered instance of
    /// `T`
    pub async fn load<T: RemoteType>(&self) -> Result<Proxy<T>> {
        let handle = self
            .core
            .activate(T::TYPE_NAME, ActivationMode::Load, Vec::new())
            .await?;
        Ok(Proxy::from_handle(handle))
    }

    /// Untyped activation, for callers that carry type names at runtime
    pub async fn activate(
        &self,
        type_name: &str,
        mode: ActivationMode,
        args: Vec<CallArg>,
    ) -> Result<ProxyHandle> {
        self.core.activate(type_name, mode, args).await
    }

    /// Wraps an already local instance in a (Local) proxy, reusing the
    /// existing proxy if the instance is registered already
    pub fn create_proxy_of(
        &self,
        instance: Arc<dyn crate::service::ServiceObject>,
        owns_instance: bool,
    ) -> Result<ProxyHandle> {
        self.core.ensure_live()?;
        let remote_type = instance.descriptor().type_name.to_string();
        let shared =
            self.core
                .registry
                .register_local(&self.core.weak, instance, owns_instance, remote_type)?;
        Ok(ProxyHandle::from_shared(shared))
    }

    /// Tears the host down; idempotent and safe to call concurrently
    pub async fn dispose(&self) {
        self.core.dispose().await;
    }

    pub fn is_disposed(&self) -> bool {
        self.core.disposed.load(Ordering::SeqCst)
    }

    /// (local, remote) proxy table sizes
    pub fn proxy_counts(&self) -> (usize, usize) {
        self.core.registry.counts()
    }

    /// Number of outbound calls still waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.core.correlator.len()
    }
}

pub(crate) struct HostCore {
    options: HostOptions,
    pub(crate) registry: ProxyRegistry,
    pub(crate) correlator: CallCorrelator,
    pub(crate) cancel: CancellationBridge,
    locator: Arc<dyn ServiceLocator>,
    /// Senders feeding the send task; taken on teardown so the task
    /// flushes and closes the transport
    frame_tx: StdMutex<Option<mpsc::Sender<Message>>>,
    halt: Arc<HaltHandle>,
    disposed: AtomicBool,
    pub(crate) weak: Weak<HostCore>,
}

impl HostCore {
    fn spawn_tasks(
        self: &Arc<Self>,
        sink: DynFrameSink,
        frames: DynFrameStream,
        frame_rx: mpsc::Receiver<Message>,
    ) {
        let weak = self.weak.clone();
        self.halt
            .add_task(tokio::spawn(send_task(weak, sink, frame_rx)));

        let weak = self.weak.clone();
        self.halt
            .spawn(move |tripwire| receive_loop(weak, frames, tripwire));

        self.halt.ready();
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::HostDisposed);
        }
        Ok(())
    }

    fn next_seq(&self) -> u32 {
        self.correlator.next_seq()
    }

    pub(crate) fn descriptor_of(&self, type_name: &str) -> Option<&'static ServiceDescriptor> {
        self.locator.descriptor(type_name)
    }

    /// Enqueues a message for the send task. Returns false once the host
    /// is tearing down.
    async fn post(&self, message: Message) -> bool {
        let tx = self
            .frame_tx
            .lock()
            .expect("BUG: frame queue mutex poisoned")
            .clone();
        match tx {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }

    // --- Outbound path ---------------------------------------------------

    pub(crate) async fn activate(
        self: &Arc<Self>,
        type_name: &str,
        mode: ActivationMode,
        args: Vec<CallArg>,
    ) -> Result<ProxyHandle> {
        self.ensure_live()?;

        let preallocated_id = self.registry.alloc_preallocated();
        let pending_record =
            self.registry
                .insert_pending_remote(&self.weak, preallocated_id, type_name.to_string());

        let encoded = match encode_call_args(&self.registry, &self.weak, args) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.discard_pending(preallocated_id, &pending_record);
                return Err(e);
            }
        };

        let pending = self.correlator.register();
        let seq = pending.seq;
        let message = Message::Activation(Activation {
            seq,
            preallocated_id,
            mode,
            type_name: type_name.to_string(),
            args: encoded.values,
        });
        trace!(
            "host: activation seq {} for `{}` under id {:#x}",
            seq,
            type_name,
            preallocated_id
        );

        if !self.post(message).await {
            self.discard_pending(preallocated_id, &pending_record);
            self.correlator.abandon(seq);
            return Err(Error::HostDisposed);
        }
        for (token_id, token) in encoded.tokens.into_iter().enumerate() {
            self.spawn_cancel_watcher(seq, token_id as i32, token, pending.done.clone());
        }

        match pending.reply.await {
            Ok(CallReply::Value(value)) => {
                match resolve_reply(&self.registry, &self.weak, value) {
                    Ok(Arg::Proxy(ProxyParam::Remote(handle))) => {
                        // The peer may have answered with a pre-existing
                        // proxy of the same instance under a different id
                        if handle.id() != preallocated_id {
                            self.discard_pending(preallocated_id, &pending_record);
                        }
                        Ok(handle)
                    }
                    Ok(_) => {
                        self.discard_pending(preallocated_id, &pending_record);
                        Err(Error::UnexpectedReply)
                    }
                    Err(exception) => {
                        self.discard_pending(preallocated_id, &pending_record);
                        Err(Error::Remote(exception.into()))
                    }
                }
            }
            Ok(CallReply::Exception(exception)) => {
                self.discard_pending(preallocated_id, &pending_record);
                Err(Error::Remote(exception.into()))
            }
            Ok(CallReply::Disposed) | Err(_) => {
                self.discard_pending(preallocated_id, &pending_record);
                Err(Error::HostDisposed)
            }
        }
    }

    fn discard_pending(&self, id: u32, record: &Arc<ProxyShared>) {
        record.mark_disposed();
        self.registry.remove_remote(id);
    }

    /// Sends a MethodCall and awaits its completion; the invocation path
    /// behind `Proxy::invoke` on remote proxies
    pub(crate) async fn send_call(
        self: &Arc<Self>,
        shared: &Arc<ProxyShared>,
        method: &MethodDesc,
        args: Vec<CallArg>,
    ) -> Result<Arg> {
        self.ensure_live()?;

        let encoded = encode_call_args(&self.registry, &self.weak, args)?;
        let pending = self.correlator.register();
        let seq = pending.seq;
        let message = Message::MethodCall(MethodCall {
            seq,
            proxy_id: shared.id,
            wait_task: method.returns_future,
            method: method.clone(),
            args: encoded.values,
        });
        trace!(
            "host: call seq {} -> proxy {} method `{}`",
            seq,
            shared.id,
            method.name
        );

        if !self.post(message).await {
            self.correlator.abandon(seq);
            return Err(Error::HostDisposed);
        }
        for (token_id, token) in encoded.tokens.into_iter().enumerate() {
            self.spawn_cancel_watcher(seq, token_id as i32, token, pending.done.clone());
        }

        match pending.reply.await {
            Ok(CallReply::Value(value)) => resolve_reply(&self.registry, &self.weak, value)
                .map_err(|exception| Error::Remote(exception.into())),
            Ok(CallReply::Exception(exception)) => Err(Error::Remote(exception.into())),
            Ok(CallReply::Disposed) | Err(_) => Err(Error::HostDisposed),
        }
    }

    /// Watches one cancellable token of an in-flight call. Once the token
    /// fires, CancellationRequests are resent with exponential backoff to
    /// defeat loss in degraded transports, until the call completes or the
    /// host halts.
    fn spawn_cancel_watcher(
        self: &Arc<Self>,
        corr: u32,
        token_id: i32,
        token: CancellationToken,
        done: CancellationToken,
    ) {
        let weak = self.weak.clone();
        let tripwire = self.halt.tripwire();
        let start = self.options.cancel_retry_start();
        let cap = self.options.cancel_retry_cap();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = done.cancelled() => return,
                _ = tripwire.clone() => return,
            }

            let mut delay = start;
            loop {
                let core = match weak.upgrade() {
                    Some(core) => core,
                    None => return,
                };
                let seq = core.next_seq();
                let sent = core
                    .post(Message::CancellationRequest(CancellationRequest {
                        seq,
                        corr,
                        token_id,
                    }))
                    .await;
                drop(core);
                if !sent {
                    return;
                }
                trace!("host: cancellation request for corr {} token {}", corr, token_id);

                tokio::select! {
                    _ = done.cancelled() => return,
                    _ = tripwire.clone() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(cap);
            }
        });
    }

    /// Releases a Local proxy whose handle was disposed
    pub(crate) fn release_local(&self, shared: &Arc<ProxyShared>) {
        self.registry.unregister_local(shared.id);
        if shared.owns_instance {
            if let Some(instance) = shared.instance.as_ref() {
                instance.dispose();
            }
        }
    }

    /// Releases a Remote proxy whose handle was disposed: removes the
    /// record and notifies the peer. Disposal does not wait for any
    /// acknowledgement; send failures are ignored.
    pub(crate) async fn release_remote(&self, shared: &Arc<ProxyShared>) {
        self.registry.remove_remote(shared.id);
        let seq = self.next_seq();
        if !self
            .post(Message::Deactivation(Deactivation {
                seq,
                proxy_id: shared.id,
            }))
            .await
        {
            debug!("host: deactivation of proxy {} not sent, host is down", shared.id);
        }
    }

    // --- Inbound path ----------------------------------------------------

    fn handle_frame(self: &Arc<Self>, frame: Frame) {
        let mut payload = frame.into_payload();
        let message = match Message::decode(&mut payload) {
            Ok(message) => message,
            Err(e) => {
                // A malformed payload is dropped; only transport errors
                // terminate the host
                warn!("host: dropping malformed frame: {}", e);
                return;
            }
        };

        match message {
            Message::MethodCall(call) => {
                // The scope must exist before the next frame is read: a
                // CancellationRequest sequenced right behind this call would
                // otherwise race the spawned handler's setup and be dropped
                let scope = self.cancel.open(call.seq);
                let core = self.clone();
                tokio::spawn(async move { core.handle_method_call(call, scope).await });
            }
            Message::Activation(activation) => {
                let scope = self.cancel.open(activation.seq);
                let core = self.clone();
                tokio::spawn(async move { core.handle_activation(activation, scope).await });
            }
            Message::ReturnValue(ret) => {
                if !self
                    .correlator
                    .complete(ret.corr, CallReply::Value(ret.value))
                {
                    trace!("host: unmatched return for corr {}", ret.corr);
                }
            }
            Message::ReturnException(ret) => {
                if !self
                    .correlator
                    .complete(ret.corr, CallReply::Exception(ret.exception))
                {
                    trace!("host: unmatched exception for corr {}", ret.corr);
                }
            }
            Message::Deactivation(deactivation) => self.handle_deactivation(deactivation),
            Message::CancellationRequest(request) => {
                if !self.cancel.signal(request.corr, request.token_id) {
                    trace!("host: dropping late cancellation for corr {}", request.corr);
                }
            }
        }
    }

    /// Runs one inbound call whose cancellation scope was opened by the
    /// receive loop
    async fn handle_method_call(self: Arc<Self>, call: MethodCall, scope: CallScope) {
        let corr = call.seq;
        let outcome = self.run_method_call(call, &scope).await;
        self.cancel.close(corr);
        self.reply(corr, outcome).await;
    }

    async fn run_method_call(
        self: &Arc<Self>,
        call: MethodCall,
        scope: &CallScope,
    ) -> std::result::Result<Value, WireException> {
        let local = self.registry.get_local(call.proxy_id).ok_or_else(|| {
            WireException::new(
                ExceptionKind::ProxyNotFound,
                "ProxyNotFound",
                format!("no local proxy with id {}", call.proxy_id),
            )
        })?;
        let instance = local
            .instance
            .clone()
            .expect("BUG: local proxy without an instance");

        let sig = instance.descriptor().resolve(&call.method).map_err(|e| {
            WireException::new(ExceptionKind::MethodResolution, "MethodResolutionError", e.to_string())
        })?;

        let args = resolve_args(&self.registry, &self.weak, call.args, scope)?;

        // Dispatch is asynchronous across the board: with `wait_task` the
        // caller has shifted awaiting here, and the settled value is what
        // travels back (void futures marshal as Null)
        let ret = instance
            .call(sig, args)
            .await
            .map_err(|fault| fault.into_wire_exception())?;

        let encoded = encode_call_args(&self.registry, &self.weak, vec![ret]).map_err(|e| {
            WireException::new(ExceptionKind::Invocation, "MarshalError", e.to_string())
        })?;
        Ok(encoded
            .values
            .into_iter()
            .next()
            .unwrap_or(Value::Null))
    }

    async fn handle_activation(self: Arc<Self>, activation: Activation, scope: CallScope) {
        let corr = activation.seq;
        let outcome = self.run_activation(activation, &scope).await;
        self.cancel.close(corr);
        self.reply(corr, outcome).await;
    }

    async fn run_activation(
        self: &Arc<Self>,
        activation: Activation,
        scope: &CallScope,
    ) -> std::result::Result<Value, WireException> {
        let args = resolve_args(&self.registry, &self.weak, activation.args, scope)?;

        let instance = match activation.mode {
            ActivationMode::Create => self.locator.construct(&activation.type_name, args),
            ActivationMode::Load => self.locator.resolve(&activation.type_name),
        }
        // The locator failure is reported as-is, not wrapped
        .map_err(|e| WireException::new(ExceptionKind::Activation, e.type_name(), e.to_string()))?;

        // Created instances are owned by their proxy, loaded singletons
        // stay with the locator
        let owns_instance = activation.mode == ActivationMode::Create;

        let shared = self
            .registry
            .register_local_with_id(
                &self.weak,
                activation.preallocated_id,
                instance,
                owns_instance,
                activation.type_name.clone(),
            )
            .map_err(|e| {
                WireException::new(ExceptionKind::Activation, "ActivationError", e.to_string())
            })?;

        debug!(
            "host: activated `{}` as local proxy {:#x}",
            activation.type_name, shared.id
        );
        Ok(Value::Proxy(local_proxy_ref(&shared)))
    }

    fn handle_deactivation(&self, deactivation: Deactivation) {
        // Unknown ids are silently ignored
        if let Some(shared) = self.registry.unregister_local(deactivation.proxy_id) {
            if shared.mark_disposed() && shared.owns_instance {
                if let Some(instance) = shared.instance.as_ref() {
                    instance.dispose();
                }
            }
            debug!("host: deactivated local proxy {}", deactivation.proxy_id);
        }
    }

    async fn reply(&self, corr: u32, outcome: std::result::Result<Value, WireException>) {
        let message = match outcome {
            Ok(value) => Message::ReturnValue(ReturnValue {
                seq: self.next_seq(),
                corr,
                value,
            }),
            Err(exception) => Message::ReturnException(ReturnException {
                seq: self.next_seq(),
                corr,
                exception,
            }),
        };
        if !self.post(message).await {
            debug!("host: reply for corr {} dropped, host is down", corr);
        }
    }

    // --- Teardown --------------------------------------------------------

    /// Tears the host down: stops the receive loop, disposes every proxy
    /// (best-effort deactivation for remote ones), fails all pending
    /// callers and closes the transport. Idempotent.
    pub(crate) async fn dispose(self: &Arc<Self>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("host: tearing down");

        // 1. Stop the receive loop (and any cancel watchers)
        self.halt.halt();

        // 2. Snapshot the tables and dispose each proxy. Deactivations are
        //    queued before the transport closes, best effort.
        let (locals, remotes) = self.registry.drain_all();
        let tx = self
            .frame_tx
            .lock()
            .expect("BUG: frame queue mutex poisoned")
            .clone();
        for shared in locals {
            if shared.mark_disposed() && shared.owns_instance {
                if let Some(instance) = shared.instance.as_ref() {
                    instance.dispose();
                }
            }
        }
        for shared in remotes {
            if shared.mark_disposed() {
                if let Some(tx) = tx.as_ref() {
                    let _ = tx.try_send(Message::Deactivation(Deactivation {
                        seq: self.next_seq(),
                        proxy_id: shared.id,
                    }));
                }
            }
        }
        drop(tx);

        // 3. Fail every outstanding correlation slot
        self.correlator.fail_all_disposed();

        // 4. Close the transport: dropping the last sender lets the send
        //    task flush the queue and close the sink
        self.frame_tx
            .lock()
            .expect("BUG: frame queue mutex poisoned")
            .take();

        if let Err(e) = self.halt.join(Some(self.options.dispose_join_timeout())).await {
            warn!("host: teardown join failed: {}", e);
        }
        debug!("host: teardown complete");
    }
}

/// The single holder of the transport sink: everything going to the wire
/// funnels through this task's queue, so no two payloads interleave and
/// queue order is wire order.
async fn send_task(
    weak: Weak<HostCore>,
    mut sink: DynFrameSink,
    mut frame_rx: mpsc::Receiver<Message>,
) {
    while let Some(message) = frame_rx.recv().await {
        if let Err(e) = sink.send(message).await {
            warn!("host: transport send failed: {}", e);
            if let Some(core) = weak.upgrade() {
                tokio::spawn(async move { core.dispose().await });
            }
            break;
        }
    }
    // Queue closed (teardown) or transport broken
    let _ = sink.close().await;
}

/// Drains the transport and dispatches decoded frames until end-of-stream,
/// a transport error, or halt
async fn receive_loop(weak: Weak<HostCore>, frames: DynFrameStream, tripwire: Tripwire) {
    let mut frames = frames.take_until(tripwire);

    while let Some(item) = frames.next().await {
        let core = match weak.upgrade() {
            Some(core) => core,
            None => return,
        };
        match item {
            Ok(frame) => core.handle_frame(frame),
            Err(e) => {
                warn!("host: transport failed: {}", e);
                tokio::spawn(async move { core.dispose().await });
                return;
            }
        }
    }

    // End of stream or halt; tear down if the peer hung up on us
    if let Some(core) = weak.upgrade() {
        if !core.disposed.load(Ordering::SeqCst) {
            debug!("host: end of stream, tearing down");
            tokio::spawn(async move { core.dispose().await });
        }
    }
}

//! Embedded script engine transport using rquickjs
//!
//! The script side sees a global `bridge` object:
//!
//! ```text
//! bridge.send({event: "update", id: "obj1", data: {...}});
//! bridge.onMessage(envelope => { ... });
//! ```
//!
//! `send` hands a JSON string to the native `__bridgeSend` function, which
//! pushes it on the inbound queue. `flush` calls `__bridgeReceive(frame)` for
//! each outbound frame, which fans the envelopes out to every listener.

use std::path::{Path, PathBuf};

use rquickjs::{Context, Function, Object, Runtime};

use super::queue::{InboundQueue, OutboundQueue};
use super::BridgeTransport;
use crate::bridge::envelope::encode_frames;
use crate::bridge::Envelope;
use crate::core::{TransportError, TransportResult};

const PRELUDE: &str = r#"
globalThis.bridge = (function () {
    const listeners = [];
    return {
        send(envelope) {
            __bridgeSend(typeof envelope === "string" ? envelope : JSON.stringify(envelope));
        },
        onMessage(listener) {
            listeners.push(listener);
        },
        receive(envelope) {
            for (const listener of listeners) {
                listener(envelope);
            }
        },
    };
})();
globalThis.__bridgeReceive = function (frame) {
    const parsed = JSON.parse(frame);
    const batch = Array.isArray(parsed) ? parsed : [parsed];
    for (const envelope of batch) {
        bridge.receive(envelope);
    }
};
"#;

fn script_error(e: rquickjs::Error) -> TransportError {
    TransportError::Script(e.to_string())
}

pub struct ScriptTransport {
    #[allow(dead_code)]
    runtime: Runtime,
    context: Context,
    inbound: InboundQueue,
    outbound: OutboundQueue,
    bootstrap: Option<PathBuf>,
    batch: bool,
    // The bootstrap runs once; listeners survive stop/start.
    loaded: bool,
    started: bool,
}

impl ScriptTransport {
    pub fn new(capacity: usize, batch: bool) -> TransportResult<Self> {
        let runtime = Runtime::new().map_err(script_error)?;
        let context = Context::full(&runtime).map_err(script_error)?;
        let transport = Self {
            runtime,
            context,
            inbound: InboundQueue::new(),
            outbound: OutboundQueue::new(capacity),
            bootstrap: None,
            batch,
            loaded: false,
            started: false,
        };
        transport.bind_api()?;
        Ok(transport)
    }

    /// Script file evaluated on the first `start`
    pub fn with_bootstrap_file(mut self, path: impl AsRef<Path>) -> Self {
        self.bootstrap = Some(path.as_ref().to_path_buf());
        self
    }

    fn bind_api(&self) -> TransportResult<()> {
        let sender = self.inbound.sender();
        self.context.with(|ctx| -> rquickjs::Result<()> {
            let global = ctx.globals();

            global.set(
                "__bridgeSend",
                Function::new(ctx.clone(), move |frame: String| {
                    sender.push(frame);
                })?,
            )?;

            let console = Object::new(ctx.clone())?;
            console.set(
                "log",
                Function::new(ctx.clone(), |msg: String| {
                    tracing::info!(target: "script", "{}", msg);
                })?,
            )?;
            console.set(
                "error",
                Function::new(ctx.clone(), |msg: String| {
                    tracing::error!(target: "script", "{}", msg);
                })?,
            )?;
            global.set("console", console)?;

            ctx.eval::<(), _>(PRELUDE)
        })
        .map_err(script_error)
    }

    /// Evaluate script code in the transport's context
    pub fn eval(&self, code: &str) -> TransportResult<()> {
        self.context
            .with(|ctx| ctx.eval::<(), _>(code))
            .map_err(script_error)
    }

    /// Evaluate an expression and parse its `JSON.stringify` result
    pub fn eval_json(&self, expression: &str) -> TransportResult<serde_json::Value> {
        let code = format!("JSON.stringify({})", expression);
        let text = self
            .context
            .with(|ctx| ctx.eval::<String, _>(code.as_str()))
            .map_err(script_error)?;
        serde_json::from_str(&text).map_err(|e| TransportError::Serialization(e.to_string()))
    }

    fn deliver(&self, frame: &str) -> TransportResult<()> {
        self.context
            .with(|ctx| -> rquickjs::Result<()> {
                let receive: Function = ctx.globals().get("__bridgeReceive")?;
                receive.call::<_, ()>((frame,))
            })
            .map_err(script_error)
    }
}

impl BridgeTransport for ScriptTransport {
    fn name(&self) -> &'static str {
        "script"
    }

    fn start(&mut self) -> TransportResult<()> {
        if self.started {
            return Ok(());
        }
        if !self.loaded {
            if let Some(path) = &self.bootstrap {
                let code = std::fs::read_to_string(path).map_err(|e| {
                    TransportError::Script(format!("failed to read {}: {}", path.display(), e))
                })?;
                self.eval(&code)?;
                tracing::info!(target: "transport", "Loaded bootstrap script {}", path.display());
            }
            self.loaded = true;
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn enqueue_outbound(&mut self, envelope: Envelope) {
        self.outbound.push(envelope);
    }

    fn flush(&mut self) -> TransportResult<usize> {
        if !self.started || self.outbound.is_empty() {
            return Ok(0);
        }
        let envelopes = self.outbound.take_all();
        let frames = match encode_frames(&envelopes, self.batch) {
            Ok(frames) => frames,
            Err(e) => {
                self.outbound.requeue_front(envelopes);
                return Err(TransportError::Serialization(e.to_string()));
            }
        };
        for frame in &frames {
            // Script exceptions come from listener code; the frame is consumed either way.
            if let Err(e) = self.deliver(frame) {
                tracing::warn!(target: "transport", "Script listener failed: {}", e);
            }
        }
        Ok(envelopes.len())
    }

    fn drain_inbound(&mut self) -> Vec<String> {
        if !self.started {
            return Vec::new();
        }
        self.inbound.drain()
    }

    fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }
}

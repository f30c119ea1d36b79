//! Pluggable encoders consulted before the built-in kind rules.
use tracing::{debug, warn};

use super::encode::{ValueEncoder, Walk};
use crate::error::{Error, Result};
use crate::ir::{Allocation, Expr, Instruction};
use crate::runtime::value::{STREAM_KIND, Value};

/// Claims some values and encodes them instead of the default rules.
///
/// A handler that allocates must register the value's identity first so that
/// repeated references resolve to the same symbol.
///
/// Identities are allocation addresses. Every composite or handle a handler
/// registers or encodes must stay alive until the walk ends; encoding a
/// temporary lets a later allocation reuse its address and alias its symbol.
pub trait ValueHandler {
    fn can_handle(&self, value: &Value) -> bool;
    fn encode(&self, value: &Value, walk: &mut Walk<'_>, encoder: &ValueEncoder) -> Result<Expr>;
}

/// Ordered handler list; the first handler that accepts a value owns it.
pub struct HandlerChain {
    handlers: Vec<Box<dyn ValueHandler>>,
}

impl HandlerChain {
    /// `additional` handlers take priority over the built-ins.
    pub fn new(additional: Vec<Box<dyn ValueHandler>>) -> Self {
        let mut handlers = additional;
        handlers.push(Box::new(StreamHandler));
        Self { handlers }
    }

    pub fn find(&self, value: &Value) -> Option<&dyn ValueHandler> {
        self.handlers.iter().find(|h| h.can_handle(value)).map(|h| h.as_ref())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// File streams: recreated from (uri, mode, position).
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamHandler;

impl ValueHandler for StreamHandler {
    fn can_handle(&self, value: &Value) -> bool {
        matches!(value, Value::Handle(h) if h.kind() == STREAM_KIND)
    }

    fn encode(&self, value: &Value, walk: &mut Walk<'_>, _encoder: &ValueEncoder) -> Result<Expr> {
        let Value::Handle(handle) = value else {
            return Err(Error::UnsupportedValueKind { kind: value.kind_name().to_string() });
        };
        if let Some(symbol) = walk.identities.lookup(handle.identity()) {
            return Ok(Expr::Symbol(symbol));
        }
        let symbol = walk.identities.register(handle.identity());

        let allocation = match (handle.path(), handle.position()) {
            (None, _) => {
                warn!(%symbol, "stream has no backing path, capturing as null");
                Allocation::Unavailable { reason: "stream has no backing path".to_string() }
            }
            (Some(path), _) if path.to_str().is_none() => {
                warn!(%symbol, path = %path.display(), "stream path is not UTF-8, capturing as null");
                Allocation::Unavailable { reason: "stream path is not valid UTF-8".to_string() }
            }
            (Some(path), Err(error)) => {
                warn!(%symbol, path = %path.display(), %error, "stream position unavailable, capturing as null");
                Allocation::Unavailable { reason: format!("stream position unavailable: {error}") }
            }
            (Some(path), Ok(position)) => {
                let uri = path.to_string_lossy();
                debug!(%symbol, uri = %uri, position, "capturing stream handle");
                Allocation::Recreate {
                    kind: STREAM_KIND.to_string(),
                    args: vec![Expr::str(&uri), Expr::str(handle.mode()), Expr::Int(position as i64)],
                }
            }
        };
        walk.buffer.push_allocation(Instruction::Allocate { symbol, allocation });
        Ok(Expr::Symbol(symbol))
    }
}

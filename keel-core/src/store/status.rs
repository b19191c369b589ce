//! The built-in connection status module.

use std::sync::Arc;

use crate::module::{Args, ModuleClass};
use crate::state::{Path, Value};

/// Name the status module is registered under in every root scope.
pub const STATUS_MODULE: &str = "StoreStatus";

/// `{isRemote, isConnected}` with `setConnected(bool)` and `isReady`.
pub(crate) fn status_class(is_remote: bool) -> Arc<ModuleClass> {
    ModuleClass::builder(STATUS_MODULE)
        .state(Value::from_pairs([
            ("isRemote", Value::Bool(is_remote)),
            ("isConnected", Value::Bool(false)),
        ]))
        .mutation("setConnected", |ctx, args| {
            ctx.set("isConnected", args.bool(0)?)
        })
        .getter("isReady", |state| {
            let flag = |key: &str| {
                state
                    .get_path(&Path::parse(key))
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            };
            Value::Bool(!flag("isRemote") || flag("isConnected"))
        })
        .build()
}

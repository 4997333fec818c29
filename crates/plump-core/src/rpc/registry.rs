//! Command registry: method name to handler.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ipc::SHUTDOWN_METHOD;
use crate::value::{Kwargs, Value};

/// A registered command.
///
/// Handlers receive the worker context (if one was installed), the positional
/// arguments and the keyword arguments of the call.
pub type Handler<C> =
    Box<dyn Fn(Option<&C>, &[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync>;

/// Dispatch table consulted by the worker loop.
///
/// Populated before the loop starts. The loop borrows its worker mutably for
/// its whole run, so the table cannot change underneath it.
pub struct CommandRegistry<C> {
    handlers: HashMap<String, Handler<C>>,
}

impl<C> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C> CommandRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Option<&C>, &[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        if name == SHUTDOWN_METHOD {
            return Err(Error::InvalidOperation(format!(
                "'{}' is reserved for the shutdown signal",
                SHUTDOWN_METHOD
            )));
        }
        if name.is_empty() {
            return Err(Error::InvalidOperation(
                "command name must not be empty".to_string(),
            ));
        }

        if self.handlers.insert(name.clone(), Box::new(handler)).is_some() {
            tracing::debug!("Replaced handler for command '{}'", name);
        }
        Ok(())
    }

    /// Register a function item under its own name.
    ///
    /// `fn add(..)` is registered as `"add"`. Closures have no usable name
    /// and are rejected; use [`register`](Self::register) for them.
    pub fn register_fn<F>(&mut self, handler: F) -> Result<String>
    where
        F: Fn(Option<&C>, &[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = fn_name::<F>()?;
        self.register(name.clone(), handler)?;
        Ok(name)
    }

    pub fn get(&self, name: &str) -> Option<&Handler<C>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Last path segment of a function item's type name, without generics.
fn fn_name<F>() -> Result<String> {
    let full = std::any::type_name::<F>();
    let path = full.split('<').next().unwrap_or(full);
    let name = path.rsplit("::").next().unwrap_or(path);

    if name.is_empty() || name.contains('{') {
        return Err(Error::InvalidOperation(format!(
            "cannot derive a command name from '{}'; register it with an explicit name",
            full
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double(_: Option<&()>, args: &[Value], _: &Kwargs) -> anyhow::Result<Value> {
        let n = args.first().and_then(Value::as_i64).unwrap_or(0);
        Ok(Value::from(n * 2))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = CommandRegistry::<()>::new();
        registry
            .register("echo", |_, args, _| Ok(Value::from(args.to_vec())))
            .unwrap();

        assert!(registry.contains("echo"));
        assert!(!registry.contains("missing"));

        let handler = registry.get("echo").unwrap();
        let out = handler(None, &[Value::from(1)], &Kwargs::new()).unwrap();
        assert_eq!(out, Value::from(vec![1]));
    }

    #[test]
    fn test_register_fn_uses_function_name() {
        let mut registry = CommandRegistry::<()>::new();
        let name = registry.register_fn(double).unwrap();
        assert_eq!(name, "double");
        assert_eq!(registry.names(), vec!["double"]);
    }

    #[test]
    fn test_register_fn_rejects_closures() {
        let mut registry = CommandRegistry::<()>::new();
        let err = registry
            .register_fn(|_: Option<&()>, _: &[Value], _: &Kwargs| Ok(Value::Null))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_shutdown_name_is_reserved() {
        let mut registry = CommandRegistry::<()>::new();
        let err = registry
            .register(SHUTDOWN_METHOD, |_, _, _| Ok(Value::Null))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry = CommandRegistry::<()>::new();
        registry.register("v", |_, _, _| Ok(Value::from(1))).unwrap();
        registry.register("v", |_, _, _| Ok(Value::from(2))).unwrap();

        assert_eq!(registry.len(), 1);
        let out = registry.get("v").unwrap()(None, &[], &Kwargs::new()).unwrap();
        assert_eq!(out, Value::from(2));
    }
}

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// A device local procedure the server can invoke
pub trait RpcHandler: Send + Sync {
    /// The method name this handler answers to
    fn method(&self) -> &str;

    /// Execute the procedure, returns `true` on success
    fn run(&self, params: &Value) -> bool;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a handler for method '{0}' is already registered")]
    Duplicate(String),
}

/// Handlers by method name
#[derive(Default)]
pub struct RpcRegistry {
    handlers: HashMap<String, Box<dyn RpcHandler>>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H) -> Result<(), RegistryError>
    where
        H: RpcHandler + 'static,
    {
        let method = handler.method().to_owned();
        if self.handlers.contains_key(&method) {
            return Err(RegistryError::Duplicate(method));
        }
        self.handlers.insert(method, Box::new(handler));
        Ok(())
    }

    /// Chainable variant of [RpcRegistry::register]
    pub fn with<H>(mut self, handler: H) -> Result<Self, RegistryError>
    where
        H: RpcHandler + 'static,
    {
        self.register(handler)?;
        Ok(self)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run the handler for `method`, `None` if no handler is registered
    pub fn run(&self, method: &str, params: &Value) -> Option<bool> {
        self.handlers.get(method).map(|handler| handler.run(params))
    }
}

impl fmt::Debug for RpcRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods().collect();
        methods.sort_unstable();
        f.debug_struct("RpcRegistry")
            .field("methods", &methods)
            .finish()
    }
}

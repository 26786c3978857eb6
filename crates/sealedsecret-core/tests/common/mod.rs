#![allow(dead_code)]
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use sealedsecret_core::{KeyResolveError, PublicKey, PublicKeyResolver};
use tokio::sync::Mutex;

/// Resolver that replays a scripted sequence of answers, then keeps
/// returning the last one.
#[derive(Clone)]
pub struct ScriptedResolver {
    script: Arc<Mutex<VecDeque<Result<PublicKey, KeyResolveError>>>>,
    calls: Arc<AtomicU32>,
}

impl ScriptedResolver {
    pub fn new(script: Vec<Result<PublicKey, KeyResolveError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fails with `err` `times` times, then hands out `key`.
    pub fn failing_then(times: usize, err: KeyResolveError, key: &str) -> Self {
        let mut script: Vec<_> = (0..times).map(|_| Err(err.clone())).collect();
        script.push(Ok(PublicKey::from(key)));
        Self::new(script)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublicKeyResolver for ScriptedResolver {
    async fn resolve(&self) -> Result<PublicKey, KeyResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().await;
        if script.len() > 1 {
            script.pop_front().expect("script is not empty")
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| Err(KeyResolveError::other("empty script")))
        }
    }
}

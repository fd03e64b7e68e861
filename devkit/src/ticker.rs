/*!
Ticker borné : laisse passer exactement N cycles puis demande l'arrêt.

Le hook optionnel s'exécute entre deux cycles, ce qui permet d'injecter des
messages de contrôle "en cours de route" de façon déterministe.
*/

use async_trait::async_trait;
use idat_meter::{StopHandle, Ticker};

type TickHook = Box<dyn FnMut(u64) + Send>;

pub struct BoundedTicker {
    cycles: u64,
    ticks: u64,
    stop: StopHandle,
    on_tick: Option<TickHook>,
}

impl BoundedTicker {
    /// Allow `cycles` publish cycles (at least one always runs).
    pub fn new(cycles: u64, stop: StopHandle) -> Self {
        Self {
            cycles: cycles.max(1),
            ticks: 0,
            stop,
            on_tick: None,
        }
    }

    /// Run `hook(n)` after cycle `n` completes, before the next one starts.
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(u64) + Send + 'static,
    {
        self.on_tick = Some(Box::new(hook));
        self
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

#[async_trait]
impl Ticker for BoundedTicker {
    async fn tick(&mut self) {
        self.ticks += 1;
        if let Some(hook) = self.on_tick.as_mut() {
            hook(self.ticks);
        }
        if self.ticks >= self.cycles {
            self.stop.request_stop();
        }
        tokio::task::yield_now().await;
    }
}

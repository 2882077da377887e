use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::services::events::BookingEvent;
use crate::services::payment::{CardProcessor, MobileMoneyProvider};

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub card_processor: Option<Box<dyn CardProcessor>>,
    pub mobile_money: Option<Box<dyn MobileMoneyProvider>>,
    pub events_tx: broadcast::Sender<BookingEvent>,
}

impl AppState {
    /// Locks the connection. Never hold the guard across an `.await`.
    pub fn db(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

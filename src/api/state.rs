use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::core::AppConfig;

pub type SharedState = Arc<RwLock<AppState>>;

pub struct AppState {
    // Session ids handed out since the server started
    pub sessions: HashSet<String>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            sessions: HashSet::new(),
            config,
        }
    }
}

use crate::{
    config::Settings,
    services::{build_directory, AccountEngine, Directory},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct GlobalState {
    pub engine: Arc<AccountEngine>,
    pub settings: Arc<Settings>,
}

impl GlobalState {
    pub fn new(settings: Settings) -> Self {
        let directory = build_directory(&settings);
        Self::with_directory(settings, directory)
    }

    pub fn with_directory(settings: Settings, directory: Arc<dyn Directory>) -> Self {
        Self {
            engine: Arc::new(AccountEngine::new(&settings, directory)),
            settings: Arc::new(settings),
        }
    }
}

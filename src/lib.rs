pub mod config;
pub mod cooldown;
pub mod crafty;
pub mod database;
pub mod events;
pub mod gatekeeper;
pub mod modules;
pub mod tasks;
pub mod utils;

use events::EventManager;
use modules::server::ServerController;
use std::sync::Arc;
use tasks::TaskManager;

pub struct Data {
    pub controller: Arc<ServerController>,
    pub task_manager: Arc<TaskManager>,
    pub event_manager: Arc<EventManager>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

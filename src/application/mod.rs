pub mod bootstrap;
pub mod commands;
pub mod controller;
pub mod resolver;
pub mod ticker;
pub mod transitioner;

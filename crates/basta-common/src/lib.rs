pub mod config;
pub mod game;
pub mod letters;
pub mod player;
pub mod protocol;
pub mod scoring;
pub mod votes;

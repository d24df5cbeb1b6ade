mod commands;
mod migrations;
mod state;

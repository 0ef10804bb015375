mod auth;
mod events;
mod failover;

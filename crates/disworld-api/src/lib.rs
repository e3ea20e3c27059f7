pub mod geocode;
pub mod handlers;
pub mod registry;
pub mod state;
pub mod sync;

#[cfg(test)]
mod testing;

// Control core: channel state, position mapping, command dispatch, idle shutoff.
pub mod dispatcher;
pub mod mapper;
pub mod registry;
pub mod watchdog;

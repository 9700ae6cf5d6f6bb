// Runtime: the cooperative control loop tying transport, dispatch and watchdog together.
pub mod control_loop;

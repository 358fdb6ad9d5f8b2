pub mod analog_input;
pub mod session_observer;

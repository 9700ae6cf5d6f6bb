// Hardware boundary: PWM driver pages, time source and the serial link.
pub mod clock;
pub mod pwm;
pub mod transport;

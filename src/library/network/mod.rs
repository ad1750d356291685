pub mod socket_helpers;

pub use socket_helpers::make_listening_socket;

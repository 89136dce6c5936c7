mod event_sink_port;
mod gateway_info_port;

pub use event_sink_port::EventSink;
pub use gateway_info_port::GatewayInfoPort;

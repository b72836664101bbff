pub mod config;
pub mod connected_message;
pub mod datagram;
pub mod datagram_header;
pub mod end_point;
pub mod handshake;
pub mod packet_handler;
pub mod receive_stream;
pub mod reliability;
pub mod send_pipeline;
pub mod send_stream;
pub mod session;
pub mod split_reassembler;
pub mod u24;

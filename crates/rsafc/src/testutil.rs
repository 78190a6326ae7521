//! In-memory scripted device used by this crate's own tests.

use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

use crate::error::AfcStatus;
use crate::packet::{Operation, Packet};
use crate::session::{self, AfcSession};

/// A session wired to a [`MockDevice`] over an in-memory duplex pipe.
pub fn pair() -> (AfcSession, MockDevice) {
    let (client, device) = duplex(1 << 20);
    (AfcSession::from_stream(client), MockDevice { stream: device })
}

pub fn le64(v: u64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

/// The device end of the pipe: tests script it request by request.
pub struct MockDevice {
    stream: DuplexStream,
}

impl MockDevice {
    pub async fn recv(&mut self) -> Packet {
        session::read_packet(&mut self.stream)
            .await
            .expect("mock device read")
    }

    pub async fn send(&mut self, packet: Packet) {
        let mut buf = Vec::new();
        packet.encode(&mut buf).expect("mock device encode");
        self.send_raw(&buf).await;
    }

    pub async fn send_status(&mut self, packet_num: u64, status: AfcStatus) {
        self.send(Packet::request(
            Operation::Status,
            packet_num,
            le64(status as u64),
            Vec::new(),
        ))
        .await;
    }

    pub async fn send_data(&mut self, packet_num: u64, payload: Vec<u8>) {
        self.send(Packet::request(
            Operation::Data,
            packet_num,
            Vec::new(),
            payload,
        ))
        .await;
    }

    pub async fn send_header(
        &mut self,
        operation: Operation,
        packet_num: u64,
        header_payload: Vec<u8>,
    ) {
        self.send(Packet::request(
            operation,
            packet_num,
            header_payload,
            Vec::new(),
        ))
        .await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("mock device write");
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

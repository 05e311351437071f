//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! SASL frame I/O.
//!
//! A SASL frame is an AMQP frame of type `0x01`:
//!
//! ```text
//! +----------+------+------+---------+-----------------+------------------+
//! | size: u32| doff | type | ignored | extended header | performative ... |
//! +----------+------+------+---------+-----------------+------------------+
//! ```
//!
//! `size` covers the whole frame. `doff` counts 4-byte words up to the body
//! and is at least 2. A frame with an empty body is a heartbeat and is
//! skipped.

use super::codec::CodecError;
use super::performative::SaslPerformative;
use crate::buffer::BufferPool;
use crate::error::AmqpError;
use crate::transport::TransportError;
use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Largest SASL frame accepted from a peer.
pub const MAX_SASL_FRAME_SIZE: usize = 64 * 1024;

/// Frame type code of SASL frames.
pub const SASL_FRAME_TYPE: u8 = 0x01;

const FRAME_HEADER_SIZE: usize = 8;
const MIN_DOFF: u8 = 2;

/// Encodes `performative` into one frame and writes it.
pub async fn write_frame<T>(
    io: &mut T,
    performative: &SaslPerformative,
    pool: &dyn BufferPool,
) -> Result<(), AmqpError>
where
    T: AsyncWrite + Unpin + ?Sized,
{
    let mut frame = pool.rent(256);
    frame.put_u32(0);
    frame.put_u8(MIN_DOFF);
    frame.put_u8(SASL_FRAME_TYPE);
    frame.put_u16(0);
    performative.encode(&mut frame);

    let size = match u32::try_from(frame.len()) {
        Ok(size) => size,
        Err(_) => {
            return Err(CodecError::FrameTooLarge {
                size: frame.len(),
                max: u32::MAX as usize,
            }
            .into());
        }
    };
    frame[..4].copy_from_slice(&size.to_be_bytes());

    trace!(%performative, size, "writing SASL frame");
    let result = match io.write_all(&frame).await {
        Ok(()) => io.flush().await,
        Err(e) => Err(e),
    };
    pool.give_back(frame);
    result.map_err(|e| TransportError::from_write(e).into())
}

/// Reads frames until one carries a performative, and decodes it.
pub async fn read_frame<T>(
    io: &mut T,
    max_frame_size: usize,
    pool: &dyn BufferPool,
) -> Result<SaslPerformative, AmqpError>
where
    T: AsyncRead + Unpin + ?Sized,
{
    loop {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        io.read_exact(&mut header)
            .await
            .map_err(TransportError::from_read)?;

        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let doff = header[4];
        let frame_type = header[5];

        if frame_type != SASL_FRAME_TYPE {
            return Err(invalid_frame(format!(
                "expected frame type 0x{SASL_FRAME_TYPE:02x}, got 0x{frame_type:02x}"
            )));
        }
        if doff < MIN_DOFF {
            return Err(invalid_frame(format!("data offset {doff} is below {MIN_DOFF}")));
        }
        if size > max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size,
                max: max_frame_size,
            }
            .into());
        }
        let body_offset = usize::from(doff) * 4;
        if size < body_offset {
            return Err(invalid_frame(format!(
                "frame size {size} is smaller than data offset {body_offset}"
            )));
        }

        let remaining = size - FRAME_HEADER_SIZE;
        let mut frame = pool.rent(remaining);
        frame.resize(remaining, 0);
        io.read_exact(&mut frame)
            .await
            .map_err(TransportError::from_read)?;

        let body = &frame[body_offset - FRAME_HEADER_SIZE..];
        if body.is_empty() {
            trace!("skipping empty SASL frame");
            pool.give_back(frame);
            continue;
        }

        let decoded = SaslPerformative::decode(body);
        pool.give_back(frame);
        let performative = decoded?;
        trace!(%performative, size, "read SASL frame");
        return Ok(performative);
    }
}

fn invalid_frame(reason: String) -> AmqpError {
    CodecError::InvalidFrame { reason }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{NoPool, SizeClassPool};
    use crate::sasl::performative::{SaslCode, SaslOutcome};
    use crate::transport::MemoryTransport;

    fn outcome() -> SaslPerformative {
        SaslPerformative::Outcome(SaslOutcome {
            code: SaslCode::Ok,
            additional_data: None,
        })
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut client, mut server) = MemoryTransport::pair_default();
        let pool = SizeClassPool::new();

        write_frame(&mut client, &outcome(), &pool).await.unwrap();
        let frame = read_frame(&mut server, MAX_SASL_FRAME_SIZE, &pool).await.unwrap();
        assert_eq!(frame, outcome());
        assert_eq!(pool.pooled(256), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_and_extended_header_skipped() {
        let (mut client, mut server) = MemoryTransport::pair_default();

        // Empty frame, then a frame with doff 3 and a 4-byte extended header.
        client.write_all(&[0, 0, 0, 8, 2, 1, 0, 0]).await.unwrap();
        let mut body = bytes::BytesMut::new();
        outcome().encode(&mut body);
        let size = (12 + body.len()) as u32;
        client.write_all(&size.to_be_bytes()).await.unwrap();
        client.write_all(&[3, 1, 0, 0, 0xde, 0xad, 0xbe, 0xef]).await.unwrap();
        client.write_all(&body).await.unwrap();

        let frame = read_frame(&mut server, MAX_SASL_FRAME_SIZE, &NoPool).await.unwrap();
        assert_eq!(frame, outcome());
    }

    #[tokio::test]
    async fn test_wrong_frame_type() {
        let (mut client, mut server) = MemoryTransport::pair_default();
        client.write_all(&[0, 0, 0, 8, 2, 0, 0, 0]).await.unwrap();

        let error = read_frame(&mut server, MAX_SASL_FRAME_SIZE, &NoPool).await.unwrap_err();
        assert!(matches!(error, AmqpError::Codec(CodecError::InvalidFrame { .. })));
    }

    #[tokio::test]
    async fn test_small_doff_rejected() {
        let (mut client, mut server) = MemoryTransport::pair_default();
        client.write_all(&[0, 0, 0, 8, 1, 1, 0, 0]).await.unwrap();

        let error = read_frame(&mut server, MAX_SASL_FRAME_SIZE, &NoPool).await.unwrap_err();
        assert!(matches!(error, AmqpError::Codec(CodecError::InvalidFrame { .. })));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_reading_body() {
        let (mut client, mut server) = MemoryTransport::pair_default();
        client.write_all(&[0, 1, 0, 1, 2, 1, 0, 0]).await.unwrap();

        let error = read_frame(&mut server, MAX_SASL_FRAME_SIZE, &NoPool).await.unwrap_err();
        assert!(matches!(
            error,
            AmqpError::Codec(CodecError::FrameTooLarge { size: 65537, .. })
        ));
    }

    #[tokio::test]
    async fn test_eof_is_connection_lost() {
        let (client, mut server) = MemoryTransport::pair_default();
        drop(client);

        let error = read_frame(&mut server, MAX_SASL_FRAME_SIZE, &NoPool).await.unwrap_err();
        assert!(matches!(
            error,
            AmqpError::Transport(TransportError::ConnectionLost { .. })
        ));
    }
}

use crate::error::{Error, Result};

/// Compute the log-base-two of the next power of two: 8 -> 3, 9 -> 4.
///
pub fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1
    }
    n
}

/// Append a length-prefixed frame to the given buffer.
///
pub fn write_frame(buffer: &mut Vec<u8>, bytes: &[u8]) {
    buffer.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    buffer.extend_from_slice(bytes);
}

/// Split a buffer of concatenated length-prefixed frames.
///
pub fn read_frames(mut buffer: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut frames = Vec::new();

    while !buffer.is_empty() {
        if buffer.len() < 8 {
            return Err(Error::Communication(format!("truncated frame header ({} bytes)", buffer.len())));
        }
        let mut header = [0; 8];
        header.copy_from_slice(&buffer[..8]);
        let size = u64::from_le_bytes(header) as usize;
        buffer = &buffer[8..];

        if buffer.len() < size {
            return Err(Error::Communication(format!("frame of {} bytes has only {} left", size, buffer.len())));
        }
        frames.push(buffer[..size].to_vec());
        buffer = &buffer[size..];
    }
    Ok(frames)
}

/// Prefix a message with the rank of its sender.
///
pub fn with_sender(rank: usize, bytes: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(bytes.len() + 8);
    message.extend_from_slice(&(rank as u64).to_le_bytes());
    message.extend_from_slice(bytes);
    message
}

/// Split a message produced by `with_sender` into the sender rank and the
/// payload.
///
pub fn split_sender(message: &[u8]) -> Result<(usize, Vec<u8>)> {
    if message.len() < 8 {
        return Err(Error::Communication(format!("message of {} bytes has no sender", message.len())));
    }
    let mut header = [0; 8];
    header.copy_from_slice(&message[..8]);
    Ok((u64::from_le_bytes(header) as usize, message[8..].to_vec()))
}

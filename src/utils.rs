use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Width and height of a VP8 keyframe, read from the first RTP packet of the
/// frame (RFC 7741 payload descriptor followed by the RFC 6386 frame header).
pub fn vp8_keyframe_dimensions(payload: &[u8]) -> Option<(u32, u32)> {
    let first = *payload.first()?;
    let extended = first & 0x80 != 0;
    let start_of_partition = first & 0x10 != 0;
    let partition_id = first & 0x07;
    if !start_of_partition || partition_id != 0 {
        return None;
    }

    let mut at = 1;
    if extended {
        let ext = *payload.get(at)?;
        at += 1;
        if ext & 0x80 != 0 {
            // PictureID, 15 bits when M is set
            let pid = *payload.get(at)?;
            at += if pid & 0x80 != 0 { 2 } else { 1 };
        }
        if ext & 0x40 != 0 {
            at += 1; // TL0PICIDX
        }
        if ext & 0x20 != 0 || ext & 0x10 != 0 {
            at += 1; // TID / KEYIDX
        }
    }

    let frame = payload.get(at..)?;
    if frame.len() < 10 {
        return None;
    }
    // P bit clear in the frame tag marks a keyframe
    if frame[0] & 0x01 != 0 {
        return None;
    }
    if frame[3..6] != [0x9d, 0x01, 0x2a] {
        return None;
    }
    let width = u16::from_le_bytes([frame[6], frame[7]]) & 0x3fff;
    let height = u16::from_le_bytes([frame[8], frame[9]]) & 0x3fff;
    Some((width as u32, height as u32))
}

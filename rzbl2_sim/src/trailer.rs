// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Images carry a little-endian CRC32/MPEG-2 of their body in the last
//! four bytes.

use byteorder::{ByteOrder, LittleEndian};
use crc_any::CRCu32;
use rzbl2_images::AuthError;

pub const TRAILER_LEN: usize = 4;

fn crc(body: &[u8]) -> u32 {
    // poly 0x04c11db7, init 0xffffffff, no reflection, no final xor
    let mut crc = CRCu32::crc32mpeg2();
    crc.digest(body);
    crc.get_crc()
}

pub fn append(mut image: Vec<u8>) -> Vec<u8> {
    let mut trailer = [0u8; TRAILER_LEN];
    LittleEndian::write_u32(&mut trailer, crc(&image));
    image.extend_from_slice(&trailer);
    image
}

pub fn check(image: &[u8]) -> Result<(), AuthError> {
    if image.len() < TRAILER_LEN {
        return Err(AuthError::Truncated);
    }
    let (body, trailer) = image.split_at(image.len() - TRAILER_LEN);
    let expected = LittleEndian::read_u32(trailer);
    let actual = crc(body);
    if expected != actual {
        return Err(AuthError::Mismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpeg2_check_value() {
        assert_eq!(crc(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn appended_trailer_checks_out() {
        let image = append(b"bl31 payload".to_vec());
        assert_eq!(image.len(), 12 + TRAILER_LEN);
        assert!(check(&image).is_ok());
    }

    #[test]
    fn corrupt_or_short_images_fail() {
        let mut image = append(vec![0xAA; 64]);
        image[3] ^= 1;
        assert!(matches!(check(&image), Err(AuthError::Mismatch { .. })));
        assert!(matches!(check(&[1, 2, 3]), Err(AuthError::Truncated)));
    }
}

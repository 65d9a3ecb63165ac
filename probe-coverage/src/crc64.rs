// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Class ids, computed the way the JaCoCo runtime computes them, so that ids
//! from recorded execution data match ids of analyzed class files.

const POLY: u64 = 0xd800_0000_0000_0000;

const TABLE: [u64; 256] = build_table();

const fn build_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;

    while i < 256 {
        let mut v = i as u64;
        let mut j = 0;

        while j < 8 {
            if v & 1 == 1 {
                v = (v >> 1) ^ POLY;
            } else {
                v >>= 1;
            }
            j += 1;
        }

        table[i] = v;
        i += 1;
    }

    table
}

fn update(sum: u64, byte: u8) -> u64 {
    TABLE[((sum ^ byte as u64) & 0xff) as usize] ^ (sum >> 8)
}

/// CRC64 of `data`, with zero init and no final xor.
pub fn checksum(data: &[u8]) -> u64 {
    data.iter().fold(0, |sum, b| update(sum, *b))
}

/// Id of a class file.
///
/// Class files of major version 53 (Java 9) are hashed as if they were
/// version 52, for compatibility with ids recorded by older agents.
pub fn class_id(data: &[u8]) -> u64 {
    if data.len() > 7 && data[6] == 0 && data[7] == 53 {
        let mut sum = 0;

        for (i, b) in data.iter().enumerate() {
            let b = if i == 7 { 52 } else { *b };
            sum = update(sum, b);
        }

        sum
    } else {
        checksum(data)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0x01]), 0x01b0_0000_0000_0000);
        assert_eq!(checksum(&[0xff]), 0x9090_0000_0000_0000);
        assert_eq!(checksum(b"JaCoCo"), 0x53fe_83fe_8bd2_e000);
    }

    #[test]
    fn test_java9_hashed_as_java8() {
        let mut java8 = vec![0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 52, 0x00, 0x10];
        let java8_id = class_id(&java8);

        java8[7] = 53;
        assert_eq!(class_id(&java8), java8_id);

        java8[7] = 55;
        assert_ne!(class_id(&java8), java8_id);
    }
}

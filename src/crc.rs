//! RMAP CRC8, as defined by ECSS-E-ST-50-52C.
//!
//! The generator polynomial is x^8 + x^2 + x + 1, processed least significant
//! bit first, with an initial value of zero and no final XOR.  The lookup
//! table is derived at compile time.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Polynomial x^8 + x^2 + x + 1 (0x07) in reflected form
const POLY_REFLECTED: u8 = 0xE0;

/// Byte-wise lookup table.  Entry 1 is 0x91, matching the standard.
pub static CRC8_TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLY_REFLECTED
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Calculate the RMAP CRC8 over `data`.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| CRC8_TABLE[(crc ^ byte) as usize])
}

//! Table-driven CRC-16 engines
//!
//! Two variants are used on the wire:
//!
//! - **D-STAR header checksum**: CCITT polynomial 0x1021 processed
//!   least-significant bit first (reflected form 0x8408), initial value
//!   0xFFFF, result one's-complemented and stored little-endian.
//! - **M17 frame CRC**: polynomial 0x5935, initial value 0xFFFF, processed
//!   most-significant bit first with no final complement, stored big-endian.

/// A CRC-16 engine with a precomputed lookup table
#[derive(Debug, Clone)]
pub struct Crc16 {
    table: [u16; 256],
    init: u16,
    reflected: bool,
}

/// Reflected CCITT engine used by the D-STAR header checksum
pub const DSTAR: Crc16 = Crc16::reflected(0x8408, 0xFFFF);

/// Engine used by the M17 frame trailer
pub const M17: Crc16 = Crc16::normal(0x5935, 0xFFFF);

impl Crc16 {
    /// Build an engine that shifts most-significant bit first
    pub const fn normal(poly: u16, init: u16) -> Self {
        let mut table = [0u16; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = (i as u16) << 8;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 0x8000 != 0 {
                    (crc << 1) ^ poly
                } else {
                    crc << 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        Self {
            table,
            init,
            reflected: false,
        }
    }

    /// Build an engine that shifts least-significant bit first
    ///
    /// `poly` must already be given in reflected form.
    pub const fn reflected(poly: u16, init: u16) -> Self {
        let mut table = [0u16; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u16;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ poly
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        Self {
            table,
            init,
            reflected: true,
        }
    }

    /// Run the engine over `data`
    pub fn checksum(&self, data: &[u8]) -> u16 {
        if self.reflected {
            data.iter().fold(self.init, |crc, &byte| {
                (crc >> 8) ^ self.table[usize::from((crc ^ u16::from(byte)) & 0xFF)]
            })
        } else {
            data.iter().fold(self.init, |crc, &byte| {
                (crc << 8) ^ self.table[usize::from((crc >> 8) ^ u16::from(byte)) & 0xFF]
            })
        }
    }
}

/// D-STAR header checksum: reflected CCITT, complemented
pub fn dstar_checksum(data: &[u8]) -> u16 {
    !DSTAR.checksum(data)
}

/// M17 frame CRC
pub fn m17_crc(data: &[u8]) -> u16 {
    M17.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK_INPUT: &[u8] = b"123456789";

    #[test]
    fn test_dstar_check_value() {
        // CRC-16/X-25 catalogue check value
        assert_eq!(dstar_checksum(CHECK_INPUT), 0x906E);
        // Without the final complement this is CRC-16/MCRF4XX
        assert_eq!(DSTAR.checksum(CHECK_INPUT), 0x6F91);
    }

    #[test]
    fn test_m17_check_values() {
        assert_eq!(m17_crc(b""), 0xFFFF);
        assert_eq!(m17_crc(b"A"), 0x206E);
        assert_eq!(m17_crc(CHECK_INPUT), 0x772B);
    }

    #[test]
    fn test_empty_input_returns_init() {
        assert_eq!(DSTAR.checksum(&[]), 0xFFFF);
        assert_eq!(dstar_checksum(&[]), 0x0000);
    }

    #[test]
    fn test_deterministic() {
        let data: Vec<u8> = (0..39).collect();
        assert_eq!(dstar_checksum(&data), dstar_checksum(&data));
        assert_eq!(m17_crc(&data), m17_crc(&data));
    }

    #[test]
    fn test_table_entries() {
        assert_eq!(DSTAR.table[0], 0);
        assert_eq!(DSTAR.table[1], 0x1189);
        assert_eq!(M17.table[0], 0);
        assert_eq!(M17.table[1], 0x5935);
    }
}

// src/certs/serial.rs
//! Random certificate serial numbers.
//!
//! Serials are drawn from the operating system's entropy source and are large
//! enough that collisions across the certificate population are negligible.
//! RFC 5280 caps serials at 20 octets. The top bit of the 20-octet draw is
//! cleared, so the DER INTEGER stays positive and fits in 20 octets even when
//! a short value needs its leading zero pad.

use crate::error::{Error, Result};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;

pub const SERIAL_OCTETS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerialNumber(BigUint);

impl SerialNumber {
    /// Draws a fresh serial from the OS entropy source.
    ///
    /// # Errors
    /// `SerialNumberGeneration` if the entropy source is unavailable; issuance
    /// must not proceed with a predictable serial.
    pub fn random() -> Result<Self> {
        Self::from_rng(&mut OsRng)
    }

    pub fn from_rng<R: RngCore>(rng: &mut R) -> Result<Self> {
        let mut bytes = [0u8; SERIAL_OCTETS];
        loop {
            rng.try_fill_bytes(&mut bytes)
                .map_err(|e| Error::SerialNumberGeneration(e.to_string()))?;
            bytes[0] &= 0x7f;

            let value = BigUint::from_bytes_be(&bytes);
            if value != BigUint::default() {
                return Ok(SerialNumber(value));
            }
        }
    }

    /// Minimal big-endian encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }

    pub fn to_hex(&self) -> String {
        format!("{:X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct DeadRng;

    impl RngCore for DeadRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, _dest: &mut [u8]) {}
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            Err(rand::Error::new("entropy source unavailable"))
        }
    }

    /// Fills every buffer with its byte pattern, repeated from the start.
    struct FixedRng(Vec<u8>);

    impl RngCore for FixedRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for (slot, byte) in dest.iter_mut().zip(self.0.iter().cycle()) {
                *slot = *byte;
            }
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    // Octets of the DER INTEGER content, counting the pad a set top bit needs.
    fn der_octets(bytes: &[u8]) -> usize {
        bytes.len() + usize::from(bytes[0] & 0x80 != 0)
    }

    #[test]
    fn serials_fit_twenty_octets_and_differ() {
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let serial = SerialNumber::random().unwrap();
            let bytes = serial.to_bytes();
            assert!(der_octets(&bytes) <= SERIAL_OCTETS);
            assert!(seen.insert(serial));
        }
    }

    #[test]
    fn top_bit_of_full_draw_is_cleared() {
        let serial = SerialNumber::from_rng(&mut FixedRng(vec![0xff])).unwrap();
        let bytes = serial.to_bytes();
        assert_eq!(bytes.len(), SERIAL_OCTETS);
        assert_eq!(bytes[0], 0x7f);
        assert_eq!(der_octets(&bytes), SERIAL_OCTETS);
    }

    #[test]
    fn short_draw_with_high_bit_still_fits() {
        let mut pattern = vec![0x00];
        pattern.extend([0xff; SERIAL_OCTETS - 1]);
        let serial = SerialNumber::from_rng(&mut FixedRng(pattern)).unwrap();
        let bytes = serial.to_bytes();
        assert_eq!(bytes.len(), SERIAL_OCTETS - 1);
        assert_eq!(bytes[0], 0xff);
        assert_eq!(der_octets(&bytes), SERIAL_OCTETS);
    }

    #[test]
    fn missing_entropy_is_fatal() {
        assert!(matches!(
            SerialNumber::from_rng(&mut DeadRng),
            Err(Error::SerialNumberGeneration(_))
        ));
    }
}

//! Data channel maps, Channel Selection Algorithm #2 and access address generation.
use rand_core::RngCore;

use crate::Error;

/// Number of data channels.
pub const DATA_CHAN_COUNT: u8 = 37;

/// Access address of advertising channel packets.
pub const ADV_ACCESS_ADDR: u32 = 0x8E89_BED6;

const ACCESS_ADDR_RETRY_MAX: usize = 16;

/// A 37-bit data channel map, channel 0 in bit 0 of the first octet.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap([u8; 5]);

impl Default for ChannelMap {
    fn default() -> Self {
        Self::ALL
    }
}

impl ChannelMap {
    pub const ALL: Self = Self([0xFF, 0xFF, 0xFF, 0xFF, 0x1F]);

    /// Bits above channel 36 are ignored.
    pub const fn new(mut map: [u8; 5]) -> Self {
        map[4] &= 0x1F;
        Self(map)
    }

    pub const fn bytes(&self) -> [u8; 5] {
        self.0
    }

    pub fn count(&self) -> u8 {
        self.0.iter().map(|b| b.count_ones() as u8).sum()
    }

    pub fn is_used(&self, chan: u8) -> bool {
        chan < DATA_CHAN_COUNT && self.0[(chan >> 3) as usize] & (1 << (chan & 7)) != 0
    }

    /// At least two channels are needed to hop.
    pub fn is_valid(&self) -> bool {
        self.count() >= 2
    }

    /// The `index`-th used channel.
    pub fn remap(&self, index: u8) -> u8 {
        (0..DATA_CHAN_COUNT)
            .filter(|chan| self.is_used(*chan))
            .nth(index as usize)
            .unwrap_or(0)
    }
}

/// Channel identifier derived from an access address.
pub const fn chan_id(access_addr: u32) -> u16 {
    ((access_addr >> 16) as u16) ^ (access_addr as u16)
}

fn perm(i: u16) -> u16 {
    let [lo, hi] = i.to_le_bytes();
    u16::from_le_bytes([lo.reverse_bits(), hi.reverse_bits()])
}

fn mam(a: u16, b: u16) -> u16 {
    a.wrapping_mul(17).wrapping_add(b)
}

fn prn_e(counter: u16, chan_id: u16) -> u16 {
    let mut prn = counter ^ chan_id;
    for _ in 0..3 {
        prn = mam(perm(prn), chan_id);
    }
    prn ^ chan_id
}

/// Channel Selection Algorithm #2: the data channel used by event `counter`.
pub fn chan_sel_2(counter: u16, chan_id: u16, map: &ChannelMap) -> u8 {
    let prn = prn_e(counter, chan_id);
    let unmapped = (prn % DATA_CHAN_COUNT as u16) as u8;
    if map.is_used(unmapped) {
        return unmapped;
    }
    let index = ((map.count() as u32 * prn as u32) >> 16) as u8;
    map.remap(index)
}

/// Shapes 32 random bits into an access address: no more than six equal bits in a row, at
/// least two transitions in the six most significant bits and no more than 24 transitions.
fn access_addr_shape(mut aa: u32) -> u32 {
    let mut bit_idx = 31;
    let mut transitions = 0;
    let mut consecutive_cnt = 1;
    let mut consecutive_bit = (aa >> bit_idx) & 1;
    while bit_idx > 0 {
        bit_idx -= 1;
        let bit = (aa >> bit_idx) & 1;
        if bit == consecutive_bit {
            consecutive_cnt += 1;
        } else {
            consecutive_cnt = 1;
            consecutive_bit = bit;
            transitions += 1;
        }

        if consecutive_cnt > 6 || (bit_idx < 28 && transitions < 2) {
            consecutive_bit ^= 1;
            aa ^= 1 << bit_idx;
            consecutive_cnt = 1;
            transitions += 1;
        }

        if transitions > 24 {
            let low = (1u32 << (bit_idx + 1)) - 1;
            if consecutive_bit == 1 {
                aa &= !low;
            } else {
                aa |= low;
            }
            break;
        }
    }
    aa
}

fn longest_run(aa: u32) -> u32 {
    let mut longest = 1;
    let mut run = 1;
    for i in (0..31).rev() {
        if (aa >> i) & 1 == (aa >> (i + 1)) & 1 {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 1;
        }
    }
    longest
}

fn access_addr_valid(aa: u32) -> bool {
    let [a, b, c, d] = aa.to_le_bytes();
    let transitions = ((aa ^ (aa >> 1)) & 0x7FFF_FFFF).count_ones();
    let top = aa >> 26;
    let top_transitions = ((top ^ (top >> 1)) & 0x1F).count_ones();
    longest_run(aa) <= 6
        && transitions <= 24
        && top_transitions >= 2
        && (aa ^ ADV_ACCESS_ADDR).count_ones() > 1
        && !(a == b && b == c && c == d)
}

/// Random access address for a periodic train or a BIG.
pub fn access_addr_get<R: RngCore>(rng: &mut R) -> Result<u32, Error> {
    for _ in 0..ACCESS_ADDR_RETRY_MAX {
        let aa = access_addr_shape(rng.next_u32());
        if access_addr_valid(aa) {
            return Ok(aa);
        }
    }
    Err(Error::Unspecified)
}

/// Random 24-bit CRC initial value.
pub fn crc_init_get<R: RngCore>(rng: &mut R) -> [u8; 3] {
    let mut crc = [0; 3];
    rng.fill_bytes(&mut crc);
    crc
}

pub const A_STATE: u8 = 0;
pub const C_STATE: u8 = 1;
pub const G_STATE: u8 = 2;
pub const T_STATE: u8 = 3;
pub const AMBIGUOUS: u8 = 4;

pub const N_STATES: usize = 4;
pub const N_OBSERVED: usize = 5;

const SYMBOLS: [char; N_OBSERVED] = ['A', 'C', 'G', 'T', 'N'];

pub fn parse_state(c: u8) -> Option<u8> {
    match c.to_ascii_uppercase() {
        b'A' => Some(A_STATE),
        b'C' => Some(C_STATE),
        b'G' => Some(G_STATE),
        b'T' | b'U' => Some(T_STATE),
        b'N' | b'-' | b'?' | b'.' | b'R' | b'Y' | b'K' | b'M' | b'S' | b'W' | b'B' | b'D'
        | b'H' | b'V' => Some(AMBIGUOUS),
        _ => None,
    }
}

pub fn symbol(state: u8) -> char {
    SYMBOLS[(state as usize).min(N_OBSERVED - 1)]
}

#[inline]
pub fn is_exact(state: u8) -> bool {
    state < AMBIGUOUS
}

#[inline]
pub fn is_transition(i: u8, j: u8) -> bool {
    i % 2 == j % 2
}

#[inline]
pub fn class_partner(i: u8) -> u8 {
    (i + 2) % 4
}

use hex_literal::hex;

/// The six retail common keys, indexed by the ticket's common key index.
pub const COMMON_KEYS: [[u8; 16]; 6] = [
    hex!("64c5fd55dd3ad988325baaec5243db98"),
    hex!("4aaa3d0e27d4d728d0b1b433f0f9cbc8"),
    hex!("fbb0ef8cdbb0d8e453cd99344371697f"),
    hex!("25959b7ad0409f72684198ba2ecd7dc6"),
    hex!("7ada22caffc476cc8297a0c7ceeeeebe"),
    hex!("a5051ca1b37dcf3afbcf8cc1edd9ce02"),
];

/// Support files the certificate-chain scanner looks for, in scan order.
pub const CERT_SUPPORT_FILES: [&str; 5] = [
    // Certificate usually used for TMDs
    "CA00000003-CP0000000b.bin",
    // Certificate usually used for tickets
    "CA00000003-XS0000000c.bin",
    // Certificate usually used for TMDs (developer)
    "CA00000004-CP00000009.bin",
    // Certificate usually used for tickets (developer)
    "CA00000004-XS0000000a.bin",
    // Combination of all certificates
    "cert_bundle.bin",
];

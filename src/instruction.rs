#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Instruction {
    /// Sleep In (10h) - Enter low-power mode
    SleepIn = 0x10,
    /// Sleep Out (11h) - Exit low-power mode
    SleepOut = 0x11,

    /// Display Inversion Off (20h) - Disable color inversion
    DisplayInversionOff = 0x20,
    /// Display Inversion On (21h) - Enable color inversion
    DisplayInversionOn = 0x21,

    /// Display Off (28h) - Disable panel output
    DisplayOff = 0x28,
    /// Display On (29h) - Enable panel output
    DisplayOn = 0x29,
    /// Column Address Set (2Ah) - Horizontal addressing bounds
    ColumnAddressSet = 0x2A,
    /// Row Address Set (2Bh) - Vertical addressing bounds
    RowAddressSet = 0x2B,
    /// Memory Write (2Ch) - Following data frame is pixel memory
    MemoryWrite = 0x2C,

    /// Tearing Effect Line On (35h) - Enable VSync output
    TearingEffectEnable = 0x35,
    /// Memory Access Control (36h) - GRAM orientation/order
    MemoryAccessControl = 0x36,
}

/// MADCTL value written by [`INIT_SEQUENCE`] (MX | BGR).
pub const DEFAULT_MADCTL: u8 = 0x48;

/// Vendor register setup, sent in order after reset.
///
/// Power, gamma, frame-rate/porch timing and 16-bit color mode. The values
/// are calibration data for the GC9A01A and must go out byte-for-byte.
pub const INIT_SEQUENCE: &[(u8, &[u8])] = &[
    (0xEF, &[]),
    (0xEB, &[0x14]),
    (0xFE, &[]),
    (0xEF, &[]),
    (0xEB, &[0x14]),
    (0x84, &[0x40]),
    (0x85, &[0xFF]),
    (0x86, &[0xFF]),
    (0x87, &[0xFF]),
    (0x88, &[0x0A]),
    (0x89, &[0x21]),
    (0x8A, &[0x00]),
    (0x8B, &[0x80]),
    (0x8C, &[0x01]),
    (0x8D, &[0x01]),
    (0x8E, &[0xFF]),
    (0x8F, &[0xFF]),
    (0xB6, &[0x00, 0x00]),
    (0x36, &[DEFAULT_MADCTL]),
    (0x3A, &[0x05]), // 16-bit color
    (0x90, &[0x08, 0x08, 0x08, 0x08]),
    (0xBD, &[0x06]),
    (0xBC, &[0x00]),
    (0xFF, &[0x60, 0x01, 0x04]),
    (0xC3, &[0x13]),
    (0xC4, &[0x13]),
    (0xC9, &[0x22]),
    (0xBE, &[0x11]),
    (0xE1, &[0x10, 0x0E]),
    (0xDF, &[0x21, 0x0C, 0x02]),
    (0xF0, &[0x45, 0x09, 0x08, 0x08, 0x26, 0x2A]),
    (0xF1, &[0x43, 0x70, 0x72, 0x36, 0x37, 0x6F]),
    (0xF2, &[0x45, 0x09, 0x08, 0x08, 0x26, 0x2A]),
    (0xF3, &[0x43, 0x70, 0x72, 0x36, 0x37, 0x6F]),
    (0xED, &[0x1B, 0x0B]),
    (0xAE, &[0x77]),
    (0xCD, &[0x63]),
    (0x70, &[0x07, 0x07, 0x04, 0x0E, 0x0F, 0x09, 0x07, 0x08, 0x03]),
    (0xE8, &[0x34]),
    (
        0x62,
        &[
            0x18, 0x0D, 0x71, 0xED, 0x70, 0x70, 0x18, 0x0F, 0x71, 0xEF, 0x70, 0x70,
        ],
    ),
    (
        0x63,
        &[
            0x18, 0x11, 0x71, 0xF1, 0x70, 0x70, 0x18, 0x13, 0x71, 0xF3, 0x70, 0x70,
        ],
    ),
    (0x64, &[0x28, 0x29, 0xF1, 0x01, 0xF1, 0x00, 0x07]),
    (0x66, &[0x3C, 0x00, 0xCD, 0x67, 0x45, 0x45, 0x10, 0x00, 0x00, 0x00]),
    (0x67, &[0x00, 0x3C, 0x00, 0x00, 0x00, 0x01, 0x54, 0x10, 0x32, 0x98]),
    (0x74, &[0x10, 0x85, 0x80, 0x00, 0x00, 0x4E, 0x00]),
    (0x98, &[0x3E, 0x07]),
];

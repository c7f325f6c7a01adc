// SPDX-License-Identifier: GPL-3.0-only
//! Supported Apple HID display models

/// Apple USB Vendor ID
pub const APPLE_VENDOR_ID: u16 = 0x05ac;

/// LG USB Vendor ID
pub const LG_VENDOR_ID: u16 = 0x043e;

/// Protocol range and identity of a supported display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
    /// Lowest raw value accepted by the feature report (not nits)
    pub min_value: u32,
    /// Highest raw value accepted by the feature report (not nits)
    pub max_value: u32,
}

const MODELS: &[ModelSpec] = &[
    ModelSpec {
        vendor_id: APPLE_VENDOR_ID,
        product_id: 0x1114,
        name: "Apple Studio Display",
        min_value: 400,
        max_value: 60000,
    },
    ModelSpec {
        vendor_id: APPLE_VENDOR_ID,
        product_id: 0x9243,
        name: "Apple Pro Display XDR",
        min_value: 400,
        max_value: 50000,
    },
    ModelSpec {
        vendor_id: LG_VENDOR_ID,
        product_id: 0x9a63,
        name: "LG UltraFine 4K Display",
        min_value: 400,
        max_value: 50000,
    },
    ModelSpec {
        vendor_id: LG_VENDOR_ID,
        product_id: 0x9a70,
        name: "LG UltraFine 5K Display",
        min_value: 400,
        max_value: 50000,
    },
];

/// Look up a supported model by USB IDs
pub fn find_model(vendor_id: u16, product_id: u16) -> Option<ModelSpec> {
    MODELS
        .iter()
        .find(|m| m.vendor_id == vendor_id && m.product_id == product_id)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_models() {
        let studio = find_model(APPLE_VENDOR_ID, 0x1114).expect("Studio Display");
        assert_eq!(studio.name, "Apple Studio Display");
        assert_eq!(studio.max_value, 60000);

        let lg = find_model(LG_VENDOR_ID, 0x9a70).expect("UltraFine 5K");
        assert_eq!(lg.min_value, 400);
    }

    #[test]
    fn test_unknown_model() {
        assert!(find_model(APPLE_VENDOR_ID, 0xFFFF).is_none());
        assert!(find_model(LG_VENDOR_ID, 0x1114).is_none());
    }
}

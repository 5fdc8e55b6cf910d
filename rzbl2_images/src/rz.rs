// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RZ/G2L boot flow: BL31, optionally BL32, the four CM33 images, then the
//! two-part BL33.

use crate::chain::{ChainError, FragmentProvider};
use crate::desc::{ExceptionLevel, ImageDescNode, ImageId, Spsr, DISABLE_ALL_EXCEPTIONS};
use crate::memmap::{MemoryMap, Region};

fn region(map: &MemoryMap, id: ImageId) -> Result<&Region, ChainError> {
    map.region(id).ok_or(ChainError::MissingRegion(id))
}

/// Secure monitor. Its `arg0` carries the parameter block address.
pub struct Bl31Fragment {
    pub bl32: bool,
}

impl FragmentProvider for Bl31Fragment {
    fn name(&self) -> &str {
        "bl31"
    }

    fn fragment(&self, map: &MemoryMap) -> Result<Vec<ImageDescNode>, ChainError> {
        let next = if self.bl32 {
            ImageId::BL32
        } else {
            ImageId::FW_CONFIG
        };
        Ok(vec![ImageDescNode::new(ImageId::BL31, region(map, ImageId::BL31)?)
            .secure()
            .executable()
            .plat_setup()
            .spsr(Spsr::aarch64(ExceptionLevel::El3, DISABLE_ALL_EXCEPTIONS))
            .arg(0, map.params_base)
            .next(next)])
    }
}

/// Secure payload; started by BL31, not by BL2.
pub struct Bl32Fragment;

impl FragmentProvider for Bl32Fragment {
    fn name(&self) -> &str {
        "bl32"
    }

    fn fragment(&self, map: &MemoryMap) -> Result<Vec<ImageDescNode>, ChainError> {
        Ok(vec![ImageDescNode::new(ImageId::BL32, region(map, ImageId::BL32)?)
            .secure()
            .executable()
            .next(ImageId::FW_CONFIG)])
    }
}

/// CM33 firmware: secure code, non-secure vectors, secure vectors and
/// non-secure code. All four are plain data to the Cortex-A side.
pub struct Cm33Fragment;

impl FragmentProvider for Cm33Fragment {
    fn name(&self) -> &str {
        "cm33"
    }

    fn fragment(&self, map: &MemoryMap) -> Result<Vec<ImageDescNode>, ChainError> {
        Ok(vec![
            ImageDescNode::new(ImageId::FW_CONFIG, region(map, ImageId::FW_CONFIG)?)
                .next(ImageId::HW_CONFIG),
            ImageDescNode::new(ImageId::HW_CONFIG, region(map, ImageId::HW_CONFIG)?)
                .next(ImageId::SOC_FW_CONFIG),
            ImageDescNode::new(ImageId::SOC_FW_CONFIG, region(map, ImageId::SOC_FW_CONFIG)?)
                .next(ImageId::RMM),
            ImageDescNode::new(ImageId::RMM, region(map, ImageId::RMM)?)
                .executable()
                .next(ImageId::BL331),
        ])
    }
}

/// Normal world loader, split in two. Only the second part runs.
pub struct Bl33Fragment {
    pub el: ExceptionLevel,
    pub arg0: u64,
}

impl FragmentProvider for Bl33Fragment {
    fn name(&self) -> &str {
        "bl33"
    }

    fn fragment(&self, map: &MemoryMap) -> Result<Vec<ImageDescNode>, ChainError> {
        Ok(vec![
            ImageDescNode::new(ImageId::BL331, region(map, ImageId::BL331)?)
                .next(ImageId::BL332),
            ImageDescNode::new(ImageId::BL332, region(map, ImageId::BL332)?)
                .executable()
                .spsr(Spsr::aarch64(self.el, DISABLE_ALL_EXCEPTIONS))
                .arg(0, self.arg0),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainBuilder;
    use crate::desc::{SecurityState, EP_EXECUTABLE, EP_SECURE};
    use crate::params::NextBlParams;

    fn build(bl32: bool) -> crate::chain::ImageChain {
        let map = MemoryMap::rzg2l();
        let mut b = ChainBuilder::new();
        b.register_provider(&Bl31Fragment { bl32 }, &map).unwrap();
        if bl32 {
            b.register_provider(&Bl32Fragment, &map).unwrap();
        }
        b.register_provider(&Cm33Fragment, &map)
            .unwrap()
            .register_provider(
                &Bl33Fragment {
                    el: ExceptionLevel::El2,
                    arg0: 0,
                },
                &map,
            )
            .unwrap();
        b.build(&map).unwrap()
    }

    #[test]
    fn default_flow_order() {
        let chain = build(false);
        let order: Vec<_> = chain.walk(chain.head()).map(|n| n.id).collect();
        assert_eq!(
            order,
            vec![
                ImageId::BL31,
                ImageId::FW_CONFIG,
                ImageId::HW_CONFIG,
                ImageId::SOC_FW_CONFIG,
                ImageId::RMM,
                ImageId::BL331,
                ImageId::BL332,
            ]
        );
        let bl31 = chain.get(ImageId::BL31).unwrap();
        assert_eq!(bl31.ep.args[0], MemoryMap::rzg2l().params_base);
        assert_eq!(bl31.ep.spsr.el(), 3);
        assert!(bl31.image.attributes.plat_setup);
    }

    #[test]
    fn bl32_slots_in_after_bl31() {
        let chain = build(true);
        let order: Vec<_> = chain.walk(chain.head()).map(|n| n.id).take(3).collect();
        assert_eq!(order, vec![ImageId::BL31, ImageId::BL32, ImageId::FW_CONFIG]);
        assert_eq!(chain.len(), 8);
    }

    #[test]
    fn bl32_is_handed_to_bl31_as_secure_payload() {
        let chain = build(true);
        let params = NextBlParams::collect(&chain, ImageId::BL31);
        let ids: Vec<_> = params.entries.iter().map(|e| e.id).collect();
        assert_eq!(
            ids,
            vec![ImageId::BL31, ImageId::BL32, ImageId::RMM, ImageId::BL332]
        );
        assert_eq!(params.entries[1].attr, EP_SECURE | EP_EXECUTABLE);
    }

    #[test]
    fn cm33_images_load_as_non_secure_data() {
        let chain = build(false);
        for id in [
            ImageId::FW_CONFIG,
            ImageId::HW_CONFIG,
            ImageId::SOC_FW_CONFIG,
        ] {
            let node = chain.get(id).unwrap();
            assert_eq!(node.image.attributes.security, SecurityState::NonSecure);
            assert!(!node.is_executable());
        }
    }

    #[test]
    fn next_stage_sees_executables_only() {
        let chain = build(false);
        let params = NextBlParams::collect(&chain, ImageId::BL31);
        let ids: Vec<_> = params.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![ImageId::BL31, ImageId::RMM, ImageId::BL332]);
        assert_eq!(params.entries[2].ep.spsr.0, 0x3c9);
    }

    #[test]
    fn missing_region_is_reported() {
        let map = MemoryMap::new(0).with_region(ImageId::BL31, 0x1000, 0x2000);
        assert_eq!(
            Cm33Fragment.fragment(&map).unwrap_err(),
            ChainError::MissingRegion(ImageId::FW_CONFIG)
        );
    }
}

// This file is part of Mork.
//
// Mork is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Mork is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Mork.  If not, see <http://www.gnu.org/licenses/>.
use anyhow::Result;
use gpu::{
    create_textures, Extent3d, Precision, RenderDevice, TextureDescriptor, TextureDimension,
    TextureFormat,
};
use static_assertions::const_assert;

pub const TRANSMITTANCE_TEXTURE_WIDTH: u32 = 256;
pub const TRANSMITTANCE_TEXTURE_HEIGHT: u32 = 64;
pub const TRANSMITTANCE_EXTENT: Extent3d =
    Extent3d::new_2d(TRANSMITTANCE_TEXTURE_WIDTH, TRANSMITTANCE_TEXTURE_HEIGHT);

pub const SCATTERING_TEXTURE_R_SIZE: u32 = 32;
pub const SCATTERING_TEXTURE_MU_SIZE: u32 = 128;
pub const SCATTERING_TEXTURE_MU_S_SIZE: u32 = 32;
pub const SCATTERING_TEXTURE_NU_SIZE: u32 = 8;
pub const SCATTERING_EXTENT: Extent3d = Extent3d::new_3d(
    SCATTERING_TEXTURE_NU_SIZE * SCATTERING_TEXTURE_MU_S_SIZE,
    SCATTERING_TEXTURE_MU_SIZE,
    SCATTERING_TEXTURE_R_SIZE,
);

pub const IRRADIANCE_TEXTURE_WIDTH: u32 = 64;
pub const IRRADIANCE_TEXTURE_HEIGHT: u32 = 16;
pub const IRRADIANCE_EXTENT: Extent3d =
    Extent3d::new_2d(IRRADIANCE_TEXTURE_WIDTH, IRRADIANCE_TEXTURE_HEIGHT);

// The mu axis is split in two halves: rays hitting the ground and rays that don't.
const_assert!(SCATTERING_TEXTURE_MU_SIZE % 2 == 0);
// nu is interpolated between two adjacent slices.
const_assert!(SCATTERING_TEXTURE_NU_SIZE >= 2);

/// Texture formats of a model, fixed at construction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableFormats {
    // Rgb when the device can render into 3 channel float textures.
    pub rgb: TextureFormat,
    pub precision: Precision,
    pub combine_scattering_textures: bool,
}

impl TableFormats {
    pub fn new(rgb_render_targets: bool, precision: Precision, combine: bool) -> Self {
        Self {
            rgb: if rgb_render_targets {
                TextureFormat::Rgb
            } else {
                TextureFormat::Rgba
            },
            precision,
            combine_scattering_textures: combine,
        }
    }

    /// The accumulated scattering needs an alpha channel when it also carries
    /// single Mie scattering.
    pub fn scattering_format(&self) -> TextureFormat {
        if self.combine_scattering_textures {
            TextureFormat::Rgba
        } else {
            self.rgb
        }
    }

    pub(crate) fn table_2d(label: &str, extent: Extent3d) -> TextureDescriptor<'_> {
        TextureDescriptor {
            label,
            dimension: TextureDimension::D2,
            extent,
            format: TextureFormat::Rgba,
            precision: Precision::Full,
        }
    }

    pub(crate) fn table_3d<'a>(&self, label: &'a str, format: TextureFormat) -> TextureDescriptor<'a> {
        TextureDescriptor {
            label,
            dimension: TextureDimension::D3,
            extent: SCATTERING_EXTENT,
            format,
            precision: self.precision,
        }
    }
}

/// Where single Mie scattering is stored. Exactly one representation exists
/// for the lifetime of a model.
#[derive(Debug)]
pub enum MieScattering<T> {
    // In the alpha channel of the scattering texture (red channel only).
    Combined,
    Separate(T),
}

impl<T> MieScattering<T> {
    pub fn texture(&self) -> Option<&T> {
        match self {
            Self::Combined => None,
            Self::Separate(texture) => Some(texture),
        }
    }

    pub fn is_combined(&self) -> bool {
        matches!(self, Self::Combined)
    }
}

/// The persistent lookup tables of a model.
#[derive(Debug)]
pub struct LookupTextures<T> {
    pub transmittance: T,
    pub scattering: T,
    pub single_mie_scattering: MieScattering<T>,
    pub irradiance: T,
}

impl<T> LookupTextures<T> {
    pub fn new<D: RenderDevice<Texture = T>>(device: &mut D, formats: &TableFormats) -> Result<Self> {
        let transmittance =
            TableFormats::table_2d("atmosphere-transmittance-texture", TRANSMITTANCE_EXTENT);
        let irradiance = TableFormats::table_2d("atmosphere-irradiance-texture", IRRADIANCE_EXTENT);
        let scattering =
            formats.table_3d("atmosphere-scattering-texture", formats.scattering_format());
        Ok(if formats.combine_scattering_textures {
            let [transmittance, scattering, irradiance] =
                create_textures(device, [&transmittance, &scattering, &irradiance])?;
            Self {
                transmittance,
                scattering,
                single_mie_scattering: MieScattering::Combined,
                irradiance,
            }
        } else {
            let single_mie_scattering =
                formats.table_3d("atmosphere-single-mie-scattering-texture", formats.rgb);
            let [transmittance, scattering, irradiance, single_mie_scattering] = create_textures(
                device,
                [
                    &transmittance,
                    &scattering,
                    &irradiance,
                    &single_mie_scattering,
                ],
            )?;
            Self {
                transmittance,
                scattering,
                single_mie_scattering: MieScattering::Separate(single_mie_scattering),
                irradiance,
            }
        })
    }

    pub fn destroy<D: RenderDevice<Texture = T>>(self, device: &mut D) {
        device.destroy_texture(self.transmittance);
        device.destroy_texture(self.scattering);
        if let MieScattering::Separate(texture) = self.single_mie_scattering {
            device.destroy_texture(texture);
        }
        device.destroy_texture(self.irradiance);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gpu::{Command, RecordingDevice};

    fn created(device: &RecordingDevice) -> Vec<(String, TextureFormat, Precision)> {
        device
            .created_textures()
            .filter_map(|c| match c {
                Command::CreateTexture {
                    label,
                    format,
                    precision,
                    ..
                } => Some((label.to_owned(), *format, *precision)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_combined_has_no_mie_texture() -> Result<()> {
        let mut device = RecordingDevice::default();
        let formats = TableFormats::new(true, Precision::Half, true);
        let textures = LookupTextures::new(&mut device, &formats)?;
        assert!(textures.single_mie_scattering.is_combined());
        assert!(textures.single_mie_scattering.texture().is_none());
        assert_eq!(device.live_textures(), 3);
        let created = created(&device);
        assert!(created.contains(&(
            "atmosphere-scattering-texture".to_owned(),
            TextureFormat::Rgba,
            Precision::Half
        )));
        textures.destroy(&mut device);
        assert_eq!(device.live_textures(), 0);
        Ok(())
    }

    #[test]
    fn test_separate_has_mie_texture() -> Result<()> {
        let mut device = RecordingDevice::default();
        let formats = TableFormats::new(true, Precision::Full, false);
        let textures = LookupTextures::new(&mut device, &formats)?;
        assert!(!textures.single_mie_scattering.is_combined());
        assert!(textures.single_mie_scattering.texture().is_some());
        assert_eq!(device.live_textures(), 4);
        let created = created(&device);
        assert!(created.contains(&(
            "atmosphere-scattering-texture".to_owned(),
            TextureFormat::Rgb,
            Precision::Full
        )));
        assert!(created.contains(&(
            "atmosphere-single-mie-scattering-texture".to_owned(),
            TextureFormat::Rgb,
            Precision::Full
        )));
        textures.destroy(&mut device);
        assert_eq!(device.live_textures(), 0);
        Ok(())
    }

    #[test]
    fn test_rgba_fallback() -> Result<()> {
        let mut device = RecordingDevice::without_rgb_render_targets();
        let formats = TableFormats::new(false, Precision::Half, false);
        let textures = LookupTextures::new(&mut device, &formats)?;
        assert!(created(&device)
            .iter()
            .all(|(_, format, _)| *format == TextureFormat::Rgba));
        textures.destroy(&mut device);
        Ok(())
    }

    #[test]
    fn test_scattering_extent() {
        assert_eq!(SCATTERING_EXTENT.width, 256);
        assert_eq!(SCATTERING_EXTENT.height, 128);
        assert_eq!(SCATTERING_EXTENT.depth, 32);
    }
}

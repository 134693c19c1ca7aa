//! HLS master playlist assembly.

use std::fmt::Write as _;
use std::path::Path;

use reelhls_models::encoding::variant_playlist_uri;
use reelhls_models::Rendition;

use crate::error::MediaResult;

/// One `EXT-X-STREAM-INF` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStream {
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    pub uri: String,
}

/// Master playlist referencing one variant per rendition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterPlaylist {
    variants: Vec<VariantStream>,
}

impl MasterPlaylist {
    /// Entries follow the order of `renditions`, which is ladder order.
    pub fn from_renditions(renditions: &[Rendition]) -> Self {
        let variants = renditions
            .iter()
            .map(|r| VariantStream {
                bandwidth: r.bandwidth(),
                width: r.width,
                height: r.height,
                uri: variant_playlist_uri(&r.profile.name),
            })
            .collect();
        Self { variants }
    }

    pub fn variants(&self) -> &[VariantStream] {
        &self.variants
    }

    /// Render the playlist text.
    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
        for v in &self.variants {
            // Writing to a String cannot fail.
            let _ = writeln!(
                out,
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
                v.bandwidth, v.width, v.height
            );
            out.push_str(&v.uri);
            out.push('\n');
        }
        out
    }

    /// Write the rendered playlist to `path`.
    pub async fn write_to(&self, path: impl AsRef<Path>) -> MediaResult<()> {
        tokio::fs::write(path, self.render()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelhls_models::{target_dimensions, QualityLadder, QualityProfile};
    use std::path::PathBuf;

    fn renditions(ladder: &QualityLadder) -> Vec<Rendition> {
        ladder
            .iter()
            .map(|profile| {
                let (width, height) = target_dimensions(profile, 16.0 / 9.0);
                Rendition {
                    profile: profile.clone(),
                    width,
                    height,
                    rendition_path: PathBuf::from(format!("{}/clip_{}.mp4", profile.name, profile.name)),
                    segment_paths: vec![],
                    variant_playlist_path: PathBuf::from(variant_playlist_uri(&profile.name)),
                }
            })
            .collect()
    }

    #[test]
    fn test_default_ladder_master_playlist() {
        let playlist = MasterPlaylist::from_renditions(&renditions(&QualityLadder::default()));

        let expected = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-STREAM-INF:BANDWIDTH=896000,RESOLUTION=640x360\n\
360p/segments/playlist.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=1528000,RESOLUTION=854x480\n\
480p/segments/playlist.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2928000,RESOLUTION=1280x720\n\
720p/segments/playlist.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=5192000,RESOLUTION=1920x1080\n\
1080p/segments/playlist.m3u8\n";

        assert_eq!(playlist.render(), expected);
    }

    #[test]
    fn test_one_entry_per_profile_in_ladder_order() {
        for n in 1..=6u32 {
            let profiles = (0..n)
                .map(|i| QualityProfile::new(&format!("q{}", i), 200 + i * 100, "500k", "64k").unwrap())
                .collect();
            let ladder = QualityLadder::new(profiles).unwrap();
            let text = MasterPlaylist::from_renditions(&renditions(&ladder)).render();

            let uris: Vec<_> = text
                .lines()
                .filter(|l| !l.starts_with('#'))
                .collect();
            let expected: Vec<_> = (0..n).map(|i| format!("q{}/segments/playlist.m3u8", i)).collect();

            assert_eq!(text.matches("#EXT-X-STREAM-INF").count(), n as usize);
            assert_eq!(uris, expected);
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let r = renditions(&QualityLadder::default());
        assert_eq!(
            MasterPlaylist::from_renditions(&r).render(),
            MasterPlaylist::from_renditions(&r).render()
        );
    }

    #[tokio::test]
    async fn test_write_to() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.m3u8");
        let playlist = MasterPlaylist::from_renditions(&renditions(&QualityLadder::default()));

        playlist.write_to(&path).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), playlist.render());
    }
}

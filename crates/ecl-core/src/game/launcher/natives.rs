/// Native library extraction for Minecraft launcher
use crate::game::installer::core::library::ResolvedLibrary;
use crate::game::installer::types::{Arch, GameLayout};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to open archive {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path:?} is not a readable archive: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Signature data never belongs in the natives directory
const ALWAYS_EXCLUDED: &[&str] = &["META-INF/"];

/// Check if a file should be excluded
fn should_exclude(file_path: &str, exclusions: &[String]) -> bool {
    ALWAYS_EXCLUDED.iter().any(|e| file_path.starts_with(e))
        || exclusions.iter().any(|e| file_path.starts_with(e.as_str()))
}

/// Architecture named by a directory component, if any
fn arch_of_segment(segment: &str) -> Option<Arch> {
    match segment.to_ascii_lowercase().as_str() {
        "x64" | "x86_64" | "amd64" => Some(Arch::X64),
        "x86" => Some(Arch::X86),
        "arm64" | "aarch64" => Some(Arch::Arm64),
        "arm32" => Some(Arch::Arm32),
        _ => None,
    }
}

/// Entries under a directory for another architecture are skipped; entries
/// with no architecture directory are kept.
fn matches_arch(entry: &str, arch: Arch) -> bool {
    let mut segments: Vec<&str> = entry.split('/').collect();
    segments.pop();
    segments
        .iter()
        .filter_map(|s| arch_of_segment(s))
        .all(|a| a == arch)
}

/// Extract platform natives from one archive into `dest_dir`, flattening
/// entries to their base name. Returns the number of files placed.
pub fn extract_natives(
    archive_path: &Path,
    dest_dir: &Path,
    arch: Arch,
    exclude: &[String],
) -> Result<usize, ExtractError> {
    log::debug!("Extracting natives from: {:?}", archive_path);

    std::fs::create_dir_all(dest_dir).map_err(|source| ExtractError::Write {
        path: dest_dir.to_path_buf(),
        source,
    })?;

    let file = std::fs::File::open(archive_path).map_err(|source| ExtractError::Open {
        path: archive_path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|source| ExtractError::Archive {
        path: archive_path.to_path_buf(),
        source,
    })?;

    let mut placed = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|source| ExtractError::Archive {
                path: archive_path.to_path_buf(),
                source,
            })?;

        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        if should_exclude(&name, exclude) || !matches_arch(&name, arch) {
            continue;
        }

        // Entries that climb out of the archive are skipped; both separators count
        let Some(base_name) = entry
            .enclosed_name()
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .and_then(|n| n.rsplit(['/', '\\']).next())
            .filter(|n| !n.is_empty() && *n != "..")
            .map(str::to_string)
        else {
            continue;
        };
        let output_path = dest_dir.join(base_name);

        // A running game keeps its natives open; identical files are left alone
        if std::fs::metadata(&output_path)
            .map(|m| m.len() == entry.size())
            .unwrap_or(false)
        {
            placed += 1;
            continue;
        }

        let mut output = std::fs::File::create(&output_path).map_err(|source| {
            ExtractError::Write {
                path: output_path.clone(),
                source,
            }
        })?;
        io::copy(&mut entry, &mut output).map_err(|source| ExtractError::Write {
            path: output_path.clone(),
            source,
        })?;
        placed += 1;
    }

    Ok(placed)
}

#[derive(Debug)]
pub struct NativeFailure {
    pub library: String,
    pub error: ExtractError,
}

#[derive(Debug, Default)]
pub struct NativesReport {
    pub extracted: usize,
    pub failures: Vec<NativeFailure>,
}

/// Extract natives for every resolved library, in declaration order.
/// A failing library does not stop the others.
pub fn extract_all_natives(
    libraries: &[ResolvedLibrary],
    layout: &GameLayout,
    dest_dir: &Path,
    arch: Arch,
) -> NativesReport {
    let mut report = NativesReport::default();

    for library in libraries {
        for archive in library.native_archives() {
            let Some(path) = layout.library_path(&archive.path) else {
                continue;
            };
            match extract_natives(&path, dest_dir, arch, &library.extract_exclude) {
                Ok(count) => report.extracted += count,
                Err(error) => {
                    log::warn!("Failed to extract natives for {}: {}", library.name, error);
                    report.failures.push(NativeFailure {
                        library: library.name.clone(),
                        error,
                    });
                }
            }
        }
    }

    log::info!(
        "Extracted {} native files into {:?} ({} failures)",
        report.extracted,
        dest_dir,
        report.failures.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::installer::core::library::ResolvedArtifact;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
        if let Some(p) = path.parent() {
            std::fs::create_dir_all(p).unwrap();
        }
        let f = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(f);
        for (name, body) in entries {
            if name.ends_with('/') {
                zip.add_directory::<&str, ()>(name, FileOptions::default())
                    .unwrap();
            } else {
                zip.start_file::<&str, ()>(name, FileOptions::default())
                    .unwrap();
                zip.write_all(body).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_should_exclude() {
        let exclusions = vec!["module-info.class".to_string()];

        assert!(should_exclude("META-INF/MANIFEST.MF", &exclusions));
        assert!(should_exclude("module-info.class", &exclusions));
        assert!(!should_exclude("org/lwjgl/Library.class", &exclusions));
    }

    #[test]
    fn arch_directories_select_entries() {
        assert!(matches_arch("windows/x64/org/lwjgl/lwjgl.dll", Arch::X64));
        assert!(!matches_arch("windows/x86/org/lwjgl/lwjgl32.dll", Arch::X64));
        assert!(!matches_arch("macos/arm64/liblwjgl.dylib", Arch::X64));
        assert!(matches_arch("liblwjgl.so", Arch::Arm64));
        // File names are not directories
        assert!(matches_arch("natives/x86", Arch::X64));
    }

    #[test]
    fn entry_names_cannot_escape_the_natives_dir() {
        let tmp = TempDir::new().unwrap();
        let jar = tmp.path().join("evil-natives.jar");
        write_jar(
            &jar,
            &[
                ("../../escape.so", b"up"),
                ("natives/..\\..\\sneaky.dll", b"win"),
                ("liblwjgl.so", b"ok"),
            ],
        );
        let dest = tmp.path().join("out").join("natives");

        extract_natives(&jar, &dest, Arch::X64, &[]).unwrap();

        let mut outside: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        outside.sort();
        assert_eq!(outside, vec!["evil-natives.jar", "out"]);
        assert_eq!(std::fs::read_dir(tmp.path().join("out")).unwrap().count(), 1);

        assert_eq!(std::fs::read(dest.join("liblwjgl.so")).unwrap(), b"ok");
        for entry in std::fs::read_dir(&dest).unwrap() {
            let name = entry.unwrap().file_name();
            assert!(name == "liblwjgl.so" || name == "sneaky.dll", "{:?}", name);
        }
    }

    #[test]
    fn extracts_flattened_platform_entries() {
        let tmp = TempDir::new().unwrap();
        let jar = tmp.path().join("lwjgl-natives-windows.jar");
        write_jar(
            &jar,
            &[
                ("META-INF/", b""),
                ("META-INF/MANIFEST.MF", b"manifest"),
                ("windows/", b""),
                ("windows/x64/org/lwjgl/lwjgl.dll", b"x64"),
                ("windows/x86/org/lwjgl/lwjgl32.dll", b"x86"),
                ("windows/arm64/org/lwjgl/lwjgl.dll", b"arm"),
                ("OpenAL.dll", b"al"),
                ("skip/me.txt", b"no"),
            ],
        );

        let out = tmp.path().join("natives");
        let count =
            extract_natives(&jar, &out, Arch::X64, &["skip/".to_string()]).unwrap();

        assert_eq!(count, 2);
        assert_eq!(std::fs::read(out.join("lwjgl.dll")).unwrap(), b"x64");
        assert_eq!(std::fs::read(out.join("OpenAL.dll")).unwrap(), b"al");
        assert!(!out.join("lwjgl32.dll").exists());
        assert!(!out.join("MANIFEST.MF").exists());
        assert!(!out.join("me.txt").exists());
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let jar = tmp.path().join("broken.jar");
        std::fs::write(&jar, b"not a zip").unwrap();
        let err = extract_natives(&jar, &tmp.path().join("out"), Arch::X64, &[]).unwrap_err();
        assert!(matches!(err, ExtractError::Archive { .. }));
    }

    #[test]
    fn one_failing_library_does_not_stop_the_rest() {
        let tmp = TempDir::new().unwrap();
        let layout = GameLayout::new(tmp.path());

        let good_rel = "org/lwjgl/lwjgl/3.3.3/lwjgl-3.3.3-natives-linux.jar";
        write_jar(
            &layout.library_path(good_rel).unwrap(),
            &[("linux/x64/org/lwjgl/liblwjgl.so", b"so")],
        );

        let artifact = |path: &str| ResolvedArtifact {
            path: path.to_string(),
            url: String::new(),
            sha1: None,
            size: None,
        };
        let libraries = vec![
            ResolvedLibrary {
                name: "org.lwjgl:lwjgl-missing:1:natives-linux".into(),
                artifact: Some(artifact("org/lwjgl/missing.jar")),
                native: None,
                extract_exclude: vec![],
            },
            ResolvedLibrary {
                name: "org.lwjgl:lwjgl:3.3.3:natives-linux".into(),
                artifact: Some(artifact(good_rel)),
                native: None,
                extract_exclude: vec![],
            },
        ];

        let out = layout.natives_dir("1.20.4");
        let report = extract_all_natives(&libraries, &layout, &out, Arch::X64);
        assert_eq!(report.extracted, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(out.join("liblwjgl.so").exists());
    }
}

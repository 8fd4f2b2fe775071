/// Argument builder for Minecraft launcher
use crate::game::identity::LaunchIdentity;
use crate::game::installer::types::Platform;
use crate::game::launcher::types::{LaunchCommand, LaunchOptions};
use crate::game::launcher::version_parser::{Argument, VersionDescriptor};
use crate::game::rules::{self, FeatureSet, RuleEvaluationError};
use dunce::canonicalize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("unresolved placeholder `{token}` in argument `{argument}`")]
    UnresolvedPlaceholder { token: String, argument: String },

    #[error(transparent)]
    Rules(#[from] RuleEvaluationError),
}

pub type Variables = HashMap<&'static str, String>;

/// Build the launch command for `descriptor`.
///
/// Conditional arguments are filtered with `options.features`; the
/// `has_custom_resolution` flag follows `options.resolution` unless the
/// caller set it explicitly.
pub fn synthesize(
    descriptor: &VersionDescriptor,
    platform: &Platform,
    classpath: &str,
    natives_dir: &Path,
    identity: &LaunchIdentity,
    options: &LaunchOptions,
) -> Result<LaunchCommand, SynthesisError> {
    let mut features = options.features.clone();
    features
        .entry("has_custom_resolution".to_string())
        .or_insert(options.resolution.is_some());

    let variables = build_variables(descriptor, platform, classpath, natives_dir, identity, options);

    let mut jvm_args = options.extra_jvm_args.clone();
    for template in select_arguments(&descriptor.jvm_args, platform, &features)? {
        jvm_args.push(substitute(template, &variables)?);
    }

    let mut game_args = Vec::new();
    for template in select_arguments(&descriptor.game_args, platform, &features)? {
        game_args.push(substitute(template, &variables)?);
    }
    game_args.extend(
        options
            .extra_game_args
            .iter()
            .filter(|s| !s.trim().is_empty())
            .cloned(),
    );

    Ok(LaunchCommand {
        executable: options.executable.clone(),
        jvm_args,
        main_class: descriptor.main_class.clone(),
        game_args,
    })
}

/// Rule-filter arguments, flattening multi-value entries in order
pub fn select_arguments<'a>(
    arguments: &'a [Argument],
    platform: &Platform,
    features: &FeatureSet,
) -> Result<Vec<&'a str>, RuleEvaluationError> {
    let mut selected = Vec::new();
    for argument in arguments {
        match argument {
            Argument::Simple(value) => selected.push(value.as_str()),
            Argument::Conditional { rules, value } => {
                if rules::evaluate(rules, platform, features)? {
                    selected.extend(value.values());
                }
            }
        }
    }
    Ok(selected)
}

/// Replace every `${name}` in `template` in a single left-to-right pass.
/// Substituted values are not scanned again.
pub fn substitute(template: &str, variables: &Variables) -> Result<String, SynthesisError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(SynthesisError::UnresolvedPlaceholder {
                token: rest[start..].to_string(),
                argument: template.to_string(),
            });
        };
        let name = &after[..end];
        let value = variables
            .get(name)
            .ok_or_else(|| SynthesisError::UnresolvedPlaceholder {
                token: format!("${{{}}}", name),
                argument: template.to_string(),
            })?;
        out.push_str(value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Prefer canonical paths so variables are stable across platforms
fn path_value(path: &Path) -> String {
    canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

/// Build the placeholder map
pub fn build_variables(
    descriptor: &VersionDescriptor,
    platform: &Platform,
    classpath: &str,
    natives_dir: &Path,
    identity: &LaunchIdentity,
    options: &LaunchOptions,
) -> Variables {
    let mut vars = Variables::new();

    vars.insert("natives_directory", path_value(natives_dir));
    vars.insert("classpath", classpath.to_string());
    vars.insert(
        "classpath_separator",
        platform.os.classpath_separator().to_string(),
    );
    vars.insert("library_directory", path_value(&options.library_dir));
    vars.insert("launcher_name", options.launcher_name.clone());
    vars.insert("launcher_version", options.launcher_version.clone());

    // Player
    vars.insert("auth_player_name", identity.player_name.clone());
    vars.insert("auth_uuid", identity.player_id.clone());
    vars.insert("auth_access_token", identity.access_token.clone());
    vars.insert("auth_session", identity.session());
    vars.insert("auth_xuid", identity.xuid.clone().unwrap_or_default());
    vars.insert("clientid", identity.client_id.clone().unwrap_or_default());
    vars.insert("user_type", identity.user_type.clone());
    vars.insert("user_properties", "{}".to_string());

    // Version
    vars.insert("version_name", descriptor.id.clone());
    vars.insert("version_type", descriptor.version_type.clone());

    // Directories
    let assets_root = path_value(&options.assets_root);
    vars.insert("game_directory", path_value(&options.game_dir));
    vars.insert(
        "game_assets",
        options
            .game_assets
            .as_deref()
            .map(path_value)
            .unwrap_or_else(|| assets_root.clone()),
    );
    vars.insert("assets_root", assets_root);
    vars.insert("assets_index_name", descriptor.asset_index.id.clone());

    if let Some((width, height)) = options.resolution {
        vars.insert("resolution_width", width.to_string());
        vars.insert("resolution_height", height.to_string());
    }

    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::installer::types::{Arch, GameLayout, OsType};
    use crate::game::launcher::version_parser::parse_version_descriptor;
    use std::path::PathBuf;

    const MODERN: &str = r#"{
        "id": "1.20.4",
        "type": "release",
        "mainClass": "net.minecraft.client.main.Main",
        "assetIndex": {"id": "12", "sha1": "aa", "size": 1, "totalSize": 2, "url": "https://piston-meta.mojang.com/12.json"},
        "downloads": {"client": {"url": "https://piston-data.mojang.com/client.jar", "sha1": "cc", "size": 3}},
        "libraries": [],
        "arguments": {
            "game": [
                "--username", "${auth_player_name}",
                "--version", "${version_name}",
                "--gameDir", "${game_directory}",
                "--assetsDir", "${assets_root}",
                "--assetIndex", "${assets_index_name}",
                "--uuid", "${auth_uuid}",
                "--accessToken", "${auth_access_token}",
                "--clientId", "${clientid}",
                "--xuid", "${auth_xuid}",
                "--userType", "${user_type}",
                "--versionType", "${version_type}",
                {"rules": [{"action": "allow", "features": {"is_demo_user": true}}], "value": "--demo"},
                {"rules": [{"action": "allow", "features": {"has_custom_resolution": true}}], "value": ["--width", "${resolution_width}", "--height", "${resolution_height}"]},
                {"rules": [{"action": "allow", "features": {"has_quick_plays_support": true}}], "value": ["--quickPlayPath", "${quickPlayPath}"]}
            ],
            "jvm": [
                {"rules": [{"action": "allow", "os": {"name": "osx"}}], "value": ["-XstartOnFirstThread"]},
                {"rules": [{"action": "allow", "os": {"name": "windows"}}], "value": "-XX:HeapDumpPath=MojangTricksIntelDriversForPerformance_javaw.exe_minecraft.exe.heapdump"},
                {"rules": [{"action": "allow", "os": {"arch": "x86"}}], "value": "-Xss1M"},
                "-Djava.library.path=${natives_directory}",
                "-Dminecraft.launcher.brand=${launcher_name}",
                "-Dminecraft.launcher.version=${launcher_version}",
                "-cp",
                "${classpath}"
            ]
        }
    }"#;

    const LEGACY: &str = r#"{
        "id": "1.8.9",
        "mainClass": "net.minecraft.client.main.Main",
        "assetIndex": {"id": "1.8", "sha1": "aa", "size": 1, "totalSize": 2, "url": "https://launchermeta.mojang.com/1.8.json"},
        "downloads": {"client": {"url": "https://launcher.mojang.com/client.jar", "sha1": "cc", "size": 3}},
        "libraries": [],
        "minecraftArguments": "--username ${auth_player_name} --version ${version_name} --gameDir ${game_directory} --assetsDir ${assets_root} --assetIndex ${assets_index_name} --uuid ${auth_uuid} --accessToken ${auth_access_token} --userProperties ${user_properties} --userType ${user_type}"
    }"#;

    fn options() -> LaunchOptions {
        let layout = GameLayout::new("/nonexistent/mc");
        LaunchOptions::new("/usr/bin/java", &layout, "/nonexistent/mc/versions/x")
    }

    fn linux() -> Platform {
        Platform::new(OsType::Linux, Arch::X64)
    }

    #[test]
    fn modern_arguments_are_filtered_and_fully_substituted() {
        let descriptor = parse_version_descriptor(MODERN.as_bytes(), "1.20.4").unwrap();
        let identity = LaunchIdentity::new("Steve", "0123abcd", "tok").with_client_id("cid");

        let cmd = synthesize(
            &descriptor,
            &linux(),
            "/a.jar:/b.jar",
            Path::new("/nonexistent/natives"),
            &identity,
            &options(),
        )
        .unwrap();

        assert_eq!(cmd.executable, PathBuf::from("/usr/bin/java"));
        assert_eq!(cmd.main_class, "net.minecraft.client.main.Main");
        assert!(cmd.arguments().iter().all(|a| !a.contains("${")));
        assert!(!cmd.jvm_args.iter().any(|a| a == "-XstartOnFirstThread"));
        assert!(!cmd.jvm_args.iter().any(|a| a.starts_with("-XX:HeapDumpPath")));
        assert!(!cmd.jvm_args.iter().any(|a| a == "-Xss1M"));
        assert!(!cmd.game_args.iter().any(|a| a == "--demo" || a == "--width"));
        assert_eq!(
            &cmd.jvm_args[cmd.jvm_args.len() - 2..],
            &["-cp".to_string(), "/a.jar:/b.jar".to_string()]
        );
        assert!(cmd
            .jvm_args
            .contains(&"-Djava.library.path=/nonexistent/natives".to_string()));
        assert!(cmd.jvm_args.contains(&"-Dminecraft.launcher.brand=ECL".to_string()));
        let after = |flag: &str| {
            let i = cmd.game_args.iter().position(|a| a == flag).unwrap();
            cmd.game_args[i + 1].clone()
        };
        assert_eq!(after("--username"), "Steve");
        assert_eq!(after("--clientId"), "cid");
        assert_eq!(after("--xuid"), "");
        assert_eq!(after("--assetIndex"), "12");
    }

    #[test]
    fn osx_gets_first_thread_flag() {
        let descriptor = parse_version_descriptor(MODERN.as_bytes(), "1.20.4").unwrap();
        let cmd = synthesize(
            &descriptor,
            &Platform::new(OsType::MacOS, Arch::Arm64),
            "cp",
            Path::new("/n"),
            &LaunchIdentity::offline("Steve"),
            &options(),
        )
        .unwrap();
        assert_eq!(cmd.jvm_args[0], "-XstartOnFirstThread");
    }

    #[test]
    fn resolution_enables_window_arguments() {
        let descriptor = parse_version_descriptor(MODERN.as_bytes(), "1.20.4").unwrap();
        let cmd = synthesize(
            &descriptor,
            &linux(),
            "cp",
            Path::new("/n"),
            &LaunchIdentity::offline("Steve"),
            &options().with_resolution(854, 480),
        )
        .unwrap();
        let i = cmd.game_args.iter().position(|a| a == "--width").unwrap();
        assert_eq!(&cmd.game_args[i..i + 4], &["--width", "854", "--height", "480"]);
    }

    #[test]
    fn enabled_feature_without_variable_is_an_error() {
        let descriptor = parse_version_descriptor(MODERN.as_bytes(), "1.20.4").unwrap();
        let err = synthesize(
            &descriptor,
            &linux(),
            "cp",
            Path::new("/n"),
            &LaunchIdentity::offline("Steve"),
            &options().with_feature("has_quick_plays_support", true),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::UnresolvedPlaceholder { ref token, .. } if token == "${quickPlayPath}"
        ));
    }

    #[test]
    fn legacy_arguments_get_classpath_and_natives() {
        let descriptor = parse_version_descriptor(LEGACY.as_bytes(), "1.8.9").unwrap();
        let mut opts = options();
        opts.extra_jvm_args = vec!["-Xms512M".into(), "-Xmx2048M".into()];
        opts.extra_game_args = vec!["--fullscreen".into(), " ".into()];

        let cmd = synthesize(
            &descriptor,
            &linux(),
            "/l.jar:/client.jar",
            Path::new("/nonexistent/1.8.9-natives"),
            &LaunchIdentity::offline("Alex"),
            &opts,
        )
        .unwrap();

        assert_eq!(
            cmd.jvm_args,
            vec![
                "-Xms512M",
                "-Xmx2048M",
                "-Djava.library.path=/nonexistent/1.8.9-natives",
                "-cp",
                "/l.jar:/client.jar"
            ]
        );
        assert!(cmd.arguments().iter().all(|a| !a.contains("${")));
        assert_eq!(cmd.game_args.last().map(String::as_str), Some("--fullscreen"));
        let i = cmd.game_args.iter().position(|a| a == "--userProperties").unwrap();
        assert_eq!(cmd.game_args[i + 1], "{}");
        assert_eq!(cmd.game_args[cmd.game_args.len() - 2], "legacy");
    }

    #[test]
    fn substitution_is_single_pass() {
        let mut vars = Variables::new();
        vars.insert("auth_player_name", "${classpath}".to_string());
        vars.insert("classpath", "/secret.jar".to_string());

        assert_eq!(
            substitute("--username ${auth_player_name}", &vars).unwrap(),
            "--username ${classpath}"
        );
        assert_eq!(
            substitute("${classpath}:${classpath}", &vars).unwrap(),
            "/secret.jar:/secret.jar"
        );
    }

    #[test]
    fn unknown_or_unclosed_placeholders_fail() {
        let vars = Variables::new();
        let err = substitute("--username ${username}", &vars).unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::UnresolvedPlaceholder { ref token, ref argument }
                if token == "${username}" && argument == "--username ${username}"
        ));
        assert!(substitute("broken ${oops", &vars).is_err());
        assert_eq!(substitute("plain $ {x}", &vars).unwrap(), "plain $ {x}");
    }
}

//! Process configuration: the admin bot's credentials and the on-disk layout, distinct from the
//! persistent data store (§4.6) the admin bot mutates at runtime.

use color_eyre::eyre::Result;
use v_utils::io::ExpandedPath;
use v_utils::macros::MyConfigPrimitives;

#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct AppConfig {
	pub admin_bot: AdminBotConfig,
	#[serde(default)]
	pub paths: PathsConfig,
}

#[derive(Clone, Debug, Default, MyConfigPrimitives)]
pub struct AdminBotConfig {
	pub bot_token: String,
	pub api_id: i32,
	pub api_hash: String,
	/// Telegram user id seeded as the primary operator the first time `operators.json` is
	/// created; ignored once that document exists.
	pub bootstrap_primary_admin: i64,
}

#[derive(Clone, Debug, MyConfigPrimitives)]
pub struct PathsConfig {
	#[serde(default = "__default_data_dir")]
	pub data_dir: String,
}

impl Default for PathsConfig {
	fn default() -> Self {
		Self { data_dir: __default_data_dir() }
	}
}

fn __default_data_dir() -> String {
	let app_name = env!("CARGO_PKG_NAME");
	let xdg_dirs = xdg::BaseDirectories::with_prefix(app_name);
	xdg_dirs.get_state_home().map(|p| p.display().to_string()).unwrap_or_else(|| format!("/tmp/{app_name}"))
}

/// Disables interactive authorisation prompts and enrolment fallbacks; a failing authorisation
/// yields a skipped account rather than blocking (§6).
pub fn headless() -> bool {
	std::env::var("TELEGRAM_HEADLESS").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

impl AppConfig {
	pub fn read(path: Option<ExpandedPath>) -> Result<Self, config::ConfigError> {
		let mut builder = config::Config::builder().add_source(config::Environment::default().separator("__"));
		let settings: Self = match path {
			Some(path) => {
				let builder = builder.add_source(config::File::with_name(&path.to_string()).required(true));
				builder.build()?.try_deserialize()?
			}
			None => {
				let app_name = env!("CARGO_PKG_NAME");
				let xdg_dirs = xdg::BaseDirectories::with_prefix(app_name);
				let xdg_conf_dir = xdg_dirs.get_config_home().unwrap().parent().unwrap().display().to_string();

				let locations = [format!("{xdg_conf_dir}/{app_name}"), format!("{xdg_conf_dir}/{app_name}/config")];
				for location in locations.iter() {
					builder = builder.add_source(config::File::with_name(location).required(false));
				}
				let raw: config::Config = builder.build()?;

				match raw.try_deserialize() {
					Ok(settings) => settings,
					Err(e) => {
						eprintln!("Config file does not exist or is invalid:");
						return Err(e);
					}
				}
			}
		};

		Ok(settings)
	}
}

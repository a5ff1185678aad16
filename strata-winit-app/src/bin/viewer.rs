use strata_crate_tools::{init_log::init_log, resource::StrataPath};
use strata_gfx::config::GfxConfig;
use strata_winit_app::app::WinitApp;

fn main() -> anyhow::Result<()> {
    init_log();
    let _tracy = tracy_client::Client::start();

    let config = GfxConfig::load_or_default(StrataPath::config_path("strata.toml"))?;
    WinitApp::run(config)
}

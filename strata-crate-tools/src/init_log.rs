use std::io::Write;

use anstyle::{AnsiColor, Color, RgbColor, Style};

/// 日志前缀中文件路径和正文使用的灰度
const FILE_GREY: RgbColor = RgbColor(110, 110, 110);
const BODY_GREY: RgbColor = RgbColor(75, 75, 75);

/// 根据日志等级选择前缀颜色
fn level_style(level: log::Level) -> Style {
    let color = match level {
        log::Level::Error => AnsiColor::Red,
        log::Level::Warn => AnsiColor::Yellow,
        log::Level::Info => AnsiColor::Green,
        log::Level::Debug => AnsiColor::Blue,
        log::Level::Trace => AnsiColor::Magenta,
    };
    Style::new().fg_color(Some(Color::Ansi(color)))
}

/// 初始化全局 logger，默认等级为 Info
///
/// 可以通过 `RUST_LOG` 环境变量覆盖，例如 `RUST_LOG=strata_gfx=debug`
pub fn init_log() {
    init_log_with_level(log::LevelFilter::Info);
}

/// 初始化全局 logger
///
/// 重复调用是安全的：只有第一次调用生效（测试中会被多次调用）
pub fn init_log_with_level(default_level: log::LevelFilter) {
    let result = env_logger::Builder::new()
        .format(|buf, record| {
            let level_style = level_style(record.level());
            let file_style = Style::new().fg_color(Some(Color::Rgb(FILE_GREY)));
            let body_style = Style::new().fg_color(Some(Color::Rgb(BODY_GREY)));

            let line = record.line().unwrap_or(!0);
            // 只保留文件名，兼容 windows 和 unix 的路径分隔符
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {file_style}[{file}:{line}]{file_style:#} \
                 {body_style}{}{body_style:#}",
                record.args()
            )
        })
        .filter(None, default_level)
        .parse_default_env()
        .try_init();

    if result.is_err() {
        log::debug!("logger already initialized");
    }
}

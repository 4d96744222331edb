use std::ffi::OsString;

use cvw::config::Config;
use cvw::error::{AppError, AppResult};
use cvw::session::ReaderSession;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> AppResult<()> {
    let (album_path, config_path) = parse_cli_args(std::env::args_os())?;
    let config = match config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::default(),
    };

    let mut session = ReaderSession::open(&album_path, config)?;
    session.goto_page(0)?;
    let state = session.renderable_state(0)?;

    println!("fingerprint: {}", session.fingerprint());
    println!("pages: {}", session.page_count());
    println!(
        "first page: {} image(s), {}x{}",
        state.images.len(),
        state.total_width,
        state.max_height
    );
    Ok(())
}

fn parse_cli_args<I>(mut args: I) -> AppResult<(OsString, Option<OsString>)>
where
    I: Iterator<Item = OsString>,
{
    let _program = args.next();
    let Some(album) = args.next() else {
        return Err(AppError::invalid_argument(
            "usage: cvw <album.{cbz,cbr,pdf}> [config.toml]",
        ));
    };
    let config = args.next();

    if args.next().is_some() {
        return Err(AppError::invalid_argument(
            "usage: cvw <album.{cbz,cbr,pdf}> [config.toml] (at most two arguments)",
        ));
    }

    Ok((album, config))
}

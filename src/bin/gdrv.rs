use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("gdrv: failed to start runtime: {error}");
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(gdrv_cli::run(
        std::env::args_os(),
        &mut io::stdout(),
        &mut io::stderr(),
    ));
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

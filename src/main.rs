use std::process::ExitCode;

fn main() -> ExitCode {
    match clinic_autosave_lib::run(std::env::args().skip(1)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("clinic-autosave: {e}");
            ExitCode::FAILURE
        }
    }
}

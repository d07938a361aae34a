use patchflow::LibraryError;
use patchflow::run;

fn main() -> Result<(), LibraryError> {
    env_logger::init();
    run(std::env::args().collect())
}

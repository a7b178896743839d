extern crate resultstore;

use resultstore::cli::Client;
use resultstore::cli::options::Options;

fn main() {
    if let Err(err) = Client::run(Options::from_args()) {
        eprintln!("{err}");
        ::std::process::exit(1);
    }
}

fn main() {
    if let Err(err) = patrol_notebook_lib::run() {
        eprintln!("patrol-notebook: {err:#}");
        std::process::exit(1);
    }
}

use video_validator::cli::Cli;

fn main() {
    let cli = Cli::parse();

    let code = match cli.run() {
        Ok(code) => code,
        Err(e) => {
            // Distinct from 1, which means corrupted files were found
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(code);
}

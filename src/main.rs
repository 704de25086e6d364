use beardown::app::AppStartupOptions;

fn main() -> anyhow::Result<()> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    beardown::app::run_with_startup(options)
}

fn parse_args(args: Vec<String>) -> anyhow::Result<AppStartupOptions> {
    let mut out = AppStartupOptions::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--backend" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--backend requires a URL value");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--backend cannot be empty");
                }
                out.backend_override = Some(value.trim().to_string());
            }
            "--autoplay" => out.autoplay_override = Some(true),
            "--no-autoplay" => out.autoplay_override = Some(false),
            "--insecure" => out.accept_invalid_certs = true,
            "--no-connect" => out.skip_connect = true,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("beardown");
    println!("  --backend URL     Backend base address (default https://localhost:8443)");
    println!("  --autoplay        Start with autoplay enabled");
    println!("  --no-autoplay     Start with autoplay disabled");
    println!("  --insecure        Accept self-signed TLS certificates");
    println!("  --no-connect      Do not connect on startup");
}

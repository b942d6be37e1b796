use release_loader_lib::{
    cli::{parse_args, Command},
    commands::{run_register, run_serve},
};

#[tokio::main]
async fn main() {
    let cli = parse_args();
    let exit_code = match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Register(args) => run_register(args).await,
    };
    std::process::exit(exit_code);
}

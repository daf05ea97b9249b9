use epigrad::runner::run_with_args;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let summary = run_with_args()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    perplexity_mcp::cli::main()
}

fn main() -> anyhow::Result<()> {
    premium_report_lib::run()
}

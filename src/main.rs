use std::sync::Arc;

use courier::provider::{memory::MemoryProvider, Provider};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    courier::run()
        .providers(vec![
            Arc::new(MemoryProvider::new("primary")) as Arc<dyn Provider>,
            Arc::new(MemoryProvider::new("backup")),
        ])
        .start()
        .await
}

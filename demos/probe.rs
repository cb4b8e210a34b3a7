use stickpad::{global, ChannelKind};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let registry = global();
    println!("backend:   {:?}", registry.backend_kind());
    println!("supported: {}", registry.is_supported());
    println!("state:     {:?}", registry.installation_state());

    for ch in registry.describe() {
        let kind = match ch.kind {
            ChannelKind::Axis => "axis",
            ChannelKind::Button => "button",
        };
        println!(
            "  {kind:<6} {:>3}  {:<10} [{}, {}]",
            ch.idx, ch.name, ch.logical_min, ch.logical_max
        );
    }
}

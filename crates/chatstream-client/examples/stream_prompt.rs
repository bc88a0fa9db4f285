use std::io::Write as _;

use chatstream_client::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ClientError> {
    let mut client = ChatClient::from_env()?;

    let sub = client.subscribe(|event| match event {
        ClientEvent::MessageAppended { delta, .. } => {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        ClientEvent::MessageStatus { label, .. } => eprintln!("[{label}]"),
        ClientEvent::MessageFinished { .. } => println!(),
        ClientEvent::TaskChanged { task } => eprintln!("task {} -> {}", task.name, task.status),
        ClientEvent::ArtifactCreated { artifact } => eprintln!("artifact: {}", artifact.title),
        ClientEvent::MessageStarted { .. } => {}
    });

    let request_id = client
        .send_prompt("Stream a short greeting.", serde_json::json!({}))
        .await?;
    eprintln!("request {request_id} done");

    client.unsubscribe(sub);
    Ok(())
}

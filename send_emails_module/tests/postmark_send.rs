use mockito::{Matcher, Server};
use send_emails_module::{OutboundEmail, PostmarkSender, SendEmailError};

fn sample_email() -> OutboundEmail {
    OutboundEmail {
        from: "support@majumail.test".to_string(),
        to: vec!["customer@example.com".to_string()],
        subject: "Your order".to_string(),
        text_body: "It shipped.".to_string(),
        html_body: Some("<p>It shipped.</p>".to_string()),
        ..OutboundEmail::default()
    }
}

#[tokio::test]
async fn send_posts_to_postmark_with_token() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/email")
        .match_header("x-postmark-server-token", "pm-test")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "From": "support@majumail.test",
            "To": "customer@example.com",
            "Subject": "Your order",
            "MessageStream": "outbound"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"To":"customer@example.com","SubmittedAt":"2024-01-01T00:00:00Z","MessageID":"pm-123","ErrorCode":0,"Message":"OK"}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let sender = PostmarkSender::new(server.url(), Some("pm-test".to_string()));
    let receipt = sender.send(&sample_email()).await?;

    assert_eq!(receipt.provider_message_id, "pm-123");
    assert_eq!(receipt.submitted_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    mock.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn provider_rejection_surfaces_status_and_message() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/email")
        .with_status(422)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ErrorCode":300,"Message":"Invalid 'From' address"}"#)
        .create_async()
        .await;

    let sender = PostmarkSender::new(server.url(), Some("pm-test".to_string()));
    let err = sender.send(&sample_email()).await.unwrap_err();
    match err {
        SendEmailError::Rejected { status, message } => {
            assert_eq!(status, 422);
            assert_eq!(message, "Invalid 'From' address");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn empty_recipient_list_is_not_sent() {
    let sender = PostmarkSender::new("http://127.0.0.1:9", Some("pm-test".to_string()));
    let mut email = sample_email();
    email.to.clear();
    let err = sender.send(&email).await.unwrap_err();
    assert!(matches!(err, SendEmailError::NoRecipients));
}

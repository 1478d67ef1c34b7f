/// Commands the render surface sends to a running chat widget.
#[derive(Debug, Clone)]
pub enum WidgetCommand {
    /// Replace the compose buffer with new user input.
    Compose(String),
    /// Submit the current compose buffer.
    Send,
    /// Deactivate the widget.
    Teardown,
}

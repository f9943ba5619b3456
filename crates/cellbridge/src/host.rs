use cellbridge_common::CallerAddress;

pub type CalculationEndHandler = Box<dyn Fn() + Send + Sync>;
pub type WorkbookClosedHandler = Box<dyn Fn(&str) + Send + Sync>;

/// What the spreadsheet host provides.
///
/// Handlers registered here are invoked by the host on its own schedule; the
/// context only keeps weak references inside them, so a host may outlive the
/// context without keeping it alive.
pub trait Host: Send + Sync {
    /// Address of the cell currently being evaluated, if any.
    fn caller_address(&self) -> Option<CallerAddress>;

    fn on_calculation_end(&self, handler: CalculationEndHandler);

    fn on_workbook_closed(&self, handler: WorkbookClosedHandler);

    /// Tell the host new RTD values are ready to pull. Called from the RTD
    /// worker thread; implementations typically marshal to the main thread.
    fn notify_ready_topics(&self);
}

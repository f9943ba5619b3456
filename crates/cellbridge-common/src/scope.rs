/// Anything holding per-workbook state that must go when the workbook closes.
pub trait WorkbookScoped: Send + Sync {
    /// Drop everything belonging to `workbook`, returning how many entries went.
    fn close_workbook(&self, workbook: &str) -> usize;
}

pub fn setup() {
    // Colored backtraces are only useful while debugging; release builds keep the default hook.
    #[cfg(debug_assertions)]
    {
        color_backtrace::install();
    }
}

#[cfg(windows)]
fn main() {
    let mut res = winres::WindowsResource::new();
    res.set("ProductName", "Capture Preview");
    res.set("FileDescription", "Capture Preview - Live Capture Viewer");
    res.set("LegalCopyright", "© 2025 Capture Preview Contributors");
    res.set("CompanyName", "Capture Preview");
    res.set("OriginalFilename", "capture-preview.exe");

    if let Err(e) = res.compile() {
        eprintln!("Failed to compile Windows resource: {}", e);
    }
}

#[cfg(not(windows))]
fn main() {
}

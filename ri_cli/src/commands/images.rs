use console::style;
use ri_core::Error;
use ri_io::Engine;

pub fn list(engine: &Engine) -> Result<(), Error> {
    let images = engine.local_images()?;
    if images.is_empty() {
        println!("No local images.");
        return Ok(());
    }

    println!(
        "{} {} local images:",
        style("==>").cyan().bold(),
        style(images.len()).bold()
    );
    for image in images {
        println!(
            "    {:<24} {:>10}  {}",
            style(&image.name).green(),
            image.size,
            style(image.path.display()).dim()
        );
    }
    Ok(())
}

pub fn delete(engine: &Engine, name: &str) -> Result<(), Error> {
    engine.delete_local_image(name)?;
    println!(
        "{} Deleted {}",
        style("==>").cyan().bold(),
        style(name).bold()
    );
    Ok(())
}
